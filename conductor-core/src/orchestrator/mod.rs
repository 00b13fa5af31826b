//! 编排器门面
//!
//! 外部调用方（CLI、REST 层）只通过这里创建、恢复、删除备份和管理备份计划。
//! 所有状态迁移都经过 [`Orchestrator::transition`]，由存储层在同一请求内检查前置状态。

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::constants::{
    backup::{DESCRIPTION_MAX_LEN, MAX_RETENTION_DAYS},
    deadlines, events, scheduler,
};
use crate::cron::{CronEval, CronPlanner};
use crate::events::{Event, EventSink, TracingEventSink};
use crate::executor::{Executor, Operation, PollState};
use crate::models::{
    Backup, BackupFilter, BackupPatch, BackupSchedule, BackupState, Metadata, ScheduleFilter,
    ScopeRef, Transition, UserInput, ValidationError,
};
use crate::store::Store;
use crate::strategy::{Deserialized, ScopeProvisioner, StrategyRegistry};
use crate::{ConductorError, Result};


/// 各类策略调用的截止时长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub backup: Duration,
    pub restore: Duration,
    pub delete: Duration,
}

impl Deadlines {
    /// 超过上限的值按上限处理
    pub fn from_secs(backup: u64, restore: u64, delete: u64) -> Self {
        let secs = |value: u64| Duration::seconds(value.min(deadlines::MAX_DEADLINE_SECS) as i64);
        Self {
            backup: secs(backup),
            restore: secs(restore),
            delete: secs(delete),
        }
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self::from_secs(
            deadlines::DEFAULT_BACKUP_SECS,
            deadlines::DEFAULT_RESTORE_SECS,
            deadlines::DEFAULT_DELETE_SECS,
        )
    }
}

/// 手动创建备份的可选参数
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    pub kept_until: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// 备份已进入恢复中状态，新资源已创建
    Started { backup: Backup, new_scope: ScopeRef },
    /// 反序列化或配额检查未通过，备份状态不变
    Rejected(Vec<ValidationError>),
}

/// 新建备份计划
#[derive(Debug, Clone)]
pub struct ScheduleDraft {
    pub scope: ScopeRef,
    pub schedule: String,
    /// 为空时使用进程默认时区
    pub timezone: Option<String>,
    pub retention_days: u32,
    pub max_backups: u16,
    pub active: bool,
    pub description: String,
}

/// 修改备份计划，未设置的字段保持不变；启停只能通过 `activate`/`deactivate`
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub schedule: Option<String>,
    pub timezone: Option<String>,
    pub retention_days: Option<u32>,
    pub max_backups: Option<u16>,
    pub description: Option<String>,
}

/// 一次计划触发的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleRun {
    /// 另一个触发正在执行
    Locked,
    /// 计划已停用
    Inactive,
    Fired {
        backup: Backup,
        pruned: Vec<String>,
        next_trigger_at: Option<DateTime<Utc>>,
    },
}

/// 按执行中状态区分的事件类型: (成功, 失败)
fn outcome_events(state: BackupState) -> (&'static str, &'static str) {
    match state {
        BackupState::Restoring => (
            events::BACKUP_RESTORATION_SUCCEEDED,
            events::BACKUP_RESTORATION_FAILED,
        ),
        BackupState::Deleting => (
            events::BACKUP_DELETION_SUCCEEDED,
            events::BACKUP_DELETION_FAILED,
        ),
        _ => (
            events::BACKUP_CREATION_SUCCEEDED,
            events::BACKUP_CREATION_FAILED,
        ),
    }
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    registry: Arc<StrategyRegistry>,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    cron: Arc<dyn CronEval>,
    events: Arc<dyn EventSink>,
    deadlines: Deadlines,
    default_timezone: String,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<StrategyRegistry>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            store,
            registry,
            executor,
            clock: Arc::new(SystemClock),
            cron: Arc::new(CronPlanner),
            events: Arc::new(TracingEventSink),
            deadlines: Deadlines::default(),
            default_timezone: scheduler::FALLBACK_TIMEZONE.to_string(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cron(mut self, cron: Arc<dyn CronEval>) -> Self {
        self.cron = cron;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_deadlines(mut self, deadlines: Deadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    pub fn with_default_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = timezone.into();
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn emit(&self, event: Event) {
        self.events.emit(event);
    }

    /// 唯一的状态迁移入口
    async fn transition(
        &self,
        backup: &Backup,
        transition: Transition,
        patch: BackupPatch,
    ) -> Result<Backup> {
        let target = backup.state.apply(transition)?;
        self.store
            .update_backup_state(&backup.id, backup.state, target, patch)
            .await
    }

    /// 不改变状态，只写入字段
    async fn patch(&self, backup: &Backup, patch: BackupPatch) -> Result<Backup> {
        self.store
            .update_backup_state(&backup.id, backup.state, backup.state, patch)
            .await
    }

    /// 从当前时间起算的截止时间
    fn deadline_after(&self, budget: Duration) -> Result<DateTime<Utc>> {
        checked_offset(self.clock.now(), budget, "deadline")
    }

    /// 同步策略调用同样受截止时间约束
    async fn bounded<T>(
        &self,
        budget: Duration,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(budget.to_std().unwrap_or_default(), call).await {
            Ok(result) => result,
            Err(_) => Err(ConductorError::DeadlineExceeded(format!(
                "{operation} 超过 {} 秒未完成",
                budget.num_seconds()
            ))),
        }
    }

    // ========== 备份 ==========

    pub async fn get_backup(&self, id: &str) -> Result<Backup> {
        self.store.get_backup(id).await
    }

    pub async fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<Backup>> {
        self.store.list_backups(filter).await
    }

    /// 手动创建备份
    pub async fn create_backup(&self, scope: ScopeRef, options: BackupOptions) -> Result<Backup> {
        self.start_backup(
            scope,
            None,
            options.kept_until,
            options.description.unwrap_or_default(),
        )
        .await
    }

    async fn start_backup(
        &self,
        scope: ScopeRef,
        schedule_id: Option<String>,
        kept_until: Option<DateTime<Utc>>,
        description: String,
    ) -> Result<Backup> {
        let strategy = self.registry.get(&scope.kind)?;
        validate_description(&description)?;
        let deadline = self.deadline_after(self.deadlines.backup)?;
        self.bounded(self.deadlines.backup, "check_scope", strategy.check_scope(&scope))
            .await?;

        let backup = Backup {
            id: Uuid::new_v4().to_string(),
            scope,
            schedule_id,
            state: BackupState::BackingUp,
            kept_until,
            created_at: self.clock.now(),
            metadata: Metadata::new(),
            result_id: None,
            description,
        };
        self.store.create_backup(&backup).await?;
        self.emit(Event::for_backup(
            events::BACKUP_CREATION_SCHEDULED,
            &backup,
            "备份已开始",
        ));
        info!(backup_id = %backup.id, scope = %backup.scope, "备份已创建");

        if strategy.is_synchronous() {
            let outcome = self
                .bounded(self.deadlines.backup, "backup", strategy.backup(&backup.scope))
                .await;
            return match outcome {
                Ok(metadata) => {
                    let patch = BackupPatch::default().with_metadata(metadata);
                    let ready = self.transition(&backup, Transition::Confirm, patch).await?;
                    self.emit(Event::for_backup(
                        events::BACKUP_CREATION_SUCCEEDED,
                        &ready,
                        "备份已完成",
                    ));
                    Ok(ready)
                }
                Err(e) => {
                    self.fail_started(&backup, &e).await?;
                    Err(e)
                }
            };
        }

        match self
            .executor
            .submit(Operation::Backup, &backup.scope, deadline)
            .await
        {
            Ok(result_id) => {
                self.patch(&backup, BackupPatch::default().with_result_id(result_id))
                    .await
            }
            Err(e) => {
                self.fail_started(&backup, &e).await?;
                Err(e)
            }
        }
    }

    /// 同步阶段失败时直接进入出错状态
    async fn fail_started(&self, backup: &Backup, error: &ConductorError) -> Result<Backup> {
        let (_, failed_event) = outcome_events(backup.state);
        let erred = self
            .transition(backup, Transition::Fail, BackupPatch::default())
            .await?;
        self.emit(Event::for_backup(failed_event, &erred, "备份操作失败").with_error(error.to_string()));
        Ok(erred)
    }

    /// 从备份恢复出新资源
    pub async fn restore(
        &self,
        backup_id: &str,
        input: UserInput,
        provisioner: &dyn ScopeProvisioner,
    ) -> Result<RestoreOutcome> {
        let backup = self.store.get_backup(backup_id).await?;
        if backup.state != BackupState::Ready {
            return Err(ConductorError::invalid_state(backup.state, "ready"));
        }

        let strategy = self.registry.get(&backup.scope.kind)?;
        let deadline = self.deadline_after(self.deadlines.restore)?;
        let deserialized = self
            .bounded(
                self.deadlines.restore,
                "deserialize",
                strategy.deserialize(&backup.metadata, &input),
            )
            .await?;
        let plan = match deserialized {
            Deserialized::Plan(plan) => plan,
            Deserialized::Invalid(errors) => {
                info!(backup_id = %backup.id, errors = errors.len(), "恢复请求未通过校验");
                return Ok(RestoreOutcome::Rejected(errors));
            }
        };

        let new_scope = self
            .bounded(self.deadlines.restore, "provision", provisioner.provision(&plan.spec))
            .await?;
        let restoring = self
            .transition(&backup, Transition::StartRestore, BackupPatch::default())
            .await?;
        self.emit(Event::for_backup(
            events::BACKUP_RESTORATION_SCHEDULED,
            &restoring,
            format!("开始恢复到 {new_scope}"),
        ));

        let op = Operation::Restore {
            new_scope_id: new_scope.id.clone(),
            input: plan.restore_input,
            snapshot_ids: plan.snapshot_ids,
        };
        let backup = match self.executor.submit(op, &restoring.scope, deadline).await {
            Ok(result_id) => {
                self.patch(&restoring, BackupPatch::default().with_result_id(result_id))
                    .await?
            }
            Err(e) => {
                self.fail_started(&restoring, &e).await?;
                return Err(e);
            }
        };

        Ok(RestoreOutcome::Started { backup, new_scope })
    }

    /// 开始删除一个就绪的备份
    pub async fn start_delete(&self, backup_id: &str) -> Result<Backup> {
        let backup = self.store.get_backup(backup_id).await?;
        let deadline = self.deadline_after(self.deadlines.delete)?;
        let deleting = self
            .transition(&backup, Transition::StartDelete, BackupPatch::default())
            .await?;
        self.emit(Event::for_backup(
            events::BACKUP_DELETION_SCHEDULED,
            &deleting,
            "开始删除备份",
        ));

        let op = Operation::Delete {
            metadata: deleting.metadata.clone(),
        };
        match self.executor.submit(op, &deleting.scope, deadline).await {
            Ok(result_id) => {
                self.patch(&deleting, BackupPatch::default().with_result_id(result_id))
                    .await
            }
            Err(e) => {
                self.fail_started(&deleting, &e).await?;
                Err(e)
            }
        }
    }

    /// 轮询执行器并推进备份状态；仍在执行时返回 `None`
    pub async fn apply_poll_result(&self, backup: &Backup) -> Result<Option<Backup>> {
        let Some(result_id) = backup.result_id.as_deref() else {
            return Ok(None);
        };
        if !backup.state.is_executing() {
            return Ok(None);
        }

        let (succeeded_event, failed_event) = outcome_events(backup.state);

        match self.executor.poll(result_id).await? {
            PollState::Pending => Ok(None),
            PollState::Done { metadata } => {
                let mut patch = BackupPatch::default().clear_result_id();
                if backup.state == BackupState::BackingUp {
                    if let Some(metadata) = metadata {
                        patch = patch.with_metadata(metadata);
                    }
                }
                let updated = self.transition(backup, Transition::Confirm, patch).await?;
                self.emit(Event::for_backup(succeeded_event, &updated, "备份操作完成"));
                Ok(Some(updated))
            }
            PollState::Failed { kind, message } => {
                let updated = self
                    .transition(
                        backup,
                        Transition::Fail,
                        BackupPatch::default().clear_result_id(),
                    )
                    .await?;
                self.emit(
                    Event::for_backup(failed_event, &updated, "备份操作失败")
                        .with_error(format!("{kind}: {message}")),
                );

                if backup.state == BackupState::BackingUp {
                    if let Some(schedule_id) = &backup.schedule_id {
                        self.deactivate_after_failure(schedule_id, &message).await?;
                    }
                }
                Ok(Some(updated))
            }
        }
    }

    // ========== 备份计划 ==========

    pub async fn get_schedule(&self, id: &str) -> Result<BackupSchedule> {
        self.store.get_schedule(id).await
    }

    pub async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<BackupSchedule>> {
        self.store.list_schedules(filter).await
    }

    pub async fn create_schedule(&self, draft: ScheduleDraft) -> Result<BackupSchedule> {
        let now = self.clock.now();
        let mut schedule = BackupSchedule {
            id: Uuid::new_v4().to_string(),
            scope: draft.scope,
            schedule: draft.schedule,
            timezone: draft
                .timezone
                .unwrap_or_else(|| self.default_timezone.clone()),
            retention_days: draft.retention_days,
            max_backups: draft.max_backups,
            next_trigger_at: None,
            active: draft.active,
            description: draft.description,
            created_at: now,
        };
        self.validate_schedule(&schedule)?;
        schedule.next_trigger_at = Some(self.next_trigger(&schedule, now)?);

        self.store.create_schedule(&schedule).await?;
        self.emit(Event::for_schedule(
            events::SCHEDULE_CREATED,
            &schedule,
            "备份计划已创建",
        ));
        Ok(schedule)
    }

    pub async fn update_schedule(&self, id: &str, update: ScheduleUpdate) -> Result<BackupSchedule> {
        let previous = self.store.get_schedule(id).await?;
        let mut schedule = previous.clone();

        if let Some(expression) = update.schedule {
            schedule.schedule = expression;
        }
        if let Some(timezone) = update.timezone {
            schedule.timezone = timezone;
        }
        if let Some(retention_days) = update.retention_days {
            schedule.retention_days = retention_days;
        }
        if let Some(max_backups) = update.max_backups {
            schedule.max_backups = max_backups;
        }
        if let Some(description) = update.description {
            schedule.description = description;
        }

        self.validate_schedule(&schedule)?;

        if schedule.schedule != previous.schedule || schedule.timezone != previous.timezone {
            schedule.next_trigger_at = Some(self.next_trigger(&schedule, self.clock.now())?);
        }

        self.store.save_schedule(&schedule).await?;
        self.emit(Event::for_schedule(
            events::SCHEDULE_UPDATED,
            &schedule,
            "备份计划已更新",
        ));
        Ok(schedule)
    }

    pub async fn activate(&self, id: &str) -> Result<BackupSchedule> {
        let mut schedule = self.store.get_schedule(id).await?;
        if schedule.active {
            return Err(ConductorError::conflict(format!("备份计划 {id} 已经启用")));
        }

        schedule.active = true;
        schedule.next_trigger_at = Some(self.next_trigger(&schedule, self.clock.now())?);
        self.store.save_schedule(&schedule).await?;

        self.emit(Event::for_schedule(
            events::SCHEDULE_ACTIVATED,
            &schedule,
            "备份计划已启用",
        ));
        Ok(schedule)
    }

    pub async fn deactivate(&self, id: &str) -> Result<BackupSchedule> {
        let mut schedule = self.store.get_schedule(id).await?;
        if !schedule.active {
            return Err(ConductorError::conflict(format!("备份计划 {id} 已经停用")));
        }

        schedule.active = false;
        self.store.save_schedule(&schedule).await?;

        self.emit(Event::for_schedule(
            events::SCHEDULE_DEACTIVATED,
            &schedule,
            "备份计划已停用",
        ));
        Ok(schedule)
    }

    /// 删除计划；已有备份保留，只解除关联
    pub async fn delete_schedule(&self, id: &str) -> Result<()> {
        let schedule = self.store.get_schedule(id).await?;
        self.store.delete_schedule(id).await?;
        self.emit(Event::for_schedule(
            events::SCHEDULE_DELETED,
            &schedule,
            "备份计划已删除",
        ));
        Ok(())
    }

    /// 触发一次计划: 创建备份、清理多余备份、计算下一次触发时间
    pub async fn execute_schedule(&self, id: &str) -> Result<ScheduleRun> {
        let now = self.clock.now();
        if !self.store.try_lock_schedule(id, now).await? {
            debug!(schedule_id = %id, "备份计划正在执行，跳过");
            return Ok(ScheduleRun::Locked);
        }

        let result = self.execute_locked(id, now).await;

        if let Err(e) = self.store.unlock_schedule(id).await {
            warn!(schedule_id = %id, "释放计划锁失败: {e}");
        }
        result
    }

    async fn execute_locked(&self, id: &str, now: DateTime<Utc>) -> Result<ScheduleRun> {
        let mut schedule = self.store.get_schedule(id).await?;
        if !schedule.active {
            return Ok(ScheduleRun::Inactive);
        }

        let created = match checked_offset(
            now,
            Duration::days(i64::from(schedule.retention_days)),
            "retention_days",
        ) {
            Ok(kept_until) => {
                self.start_backup(
                    schedule.scope.clone(),
                    Some(schedule.id.clone()),
                    Some(kept_until),
                    scheduler::SCHEDULED_BACKUP_DESCRIPTION.to_string(),
                )
                .await
            }
            Err(e) => Err(e),
        };

        let backup = match created {
            Ok(backup) => backup,
            Err(e) => {
                if matches!(
                    e,
                    ConductorError::StrategyExecution(_) | ConductorError::DeadlineExceeded(_)
                ) {
                    schedule.active = false;
                    self.emit(
                        Event::for_schedule(
                            events::SCHEDULE_DEACTIVATED,
                            &schedule,
                            "备份失败，计划已停用",
                        )
                        .with_error(e.to_string()),
                    );
                } else {
                    // 其他错误不停用计划，但仍推进触发时间
                    schedule.next_trigger_at = Some(self.next_trigger(&schedule, now)?);
                }
                self.store.save_schedule(&schedule).await?;
                return Err(e);
            }
        };

        let pruned = self.delete_extra_backups(&schedule, &backup).await?;

        schedule.next_trigger_at = Some(self.next_trigger(&schedule, now)?);
        self.store.save_schedule(&schedule).await?;

        info!(
            schedule_id = %schedule.id,
            backup_id = %backup.id,
            pruned = pruned.len(),
            "备份计划已触发"
        );

        Ok(ScheduleRun::Fired {
            backup,
            pruned,
            next_trigger_at: schedule.next_trigger_at,
        })
    }

    /// 存活备份超过上限时从最旧的就绪备份开始删除
    async fn delete_extra_backups(
        &self,
        schedule: &BackupSchedule,
        newest: &Backup,
    ) -> Result<Vec<String>> {
        let live: Vec<Backup> = self
            .store
            .list_backups(&BackupFilter::for_schedule(schedule.id.clone()))
            .await?
            .into_iter()
            .filter(|b| b.state.is_live())
            .collect();

        let max = usize::from(schedule.max_backups);
        if live.len() <= max {
            return Ok(Vec::new());
        }

        let mut excess = live.len() - max;
        let mut pruned = Vec::new();
        for backup in live.iter().filter(|b| b.id != newest.id) {
            if excess == 0 {
                break;
            }
            if backup.state != BackupState::Ready {
                debug!(backup_id = %backup.id, state = %backup.state, "备份不在就绪状态，跳过清理");
                continue;
            }
            match self.start_delete(&backup.id).await {
                Ok(_) => {
                    pruned.push(backup.id.clone());
                    excess -= 1;
                }
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => {
                    warn!(backup_id = %backup.id, "清理多余备份失败: {e}");
                }
            }
        }

        if excess > 0 {
            warn!(schedule_id = %schedule.id, excess, "仍有多余备份无法清理");
        }
        Ok(pruned)
    }

    /// 备份失败时停用其所属计划
    async fn deactivate_after_failure(&self, schedule_id: &str, reason: &str) -> Result<()> {
        let mut schedule = match self.store.get_schedule(schedule_id).await {
            Ok(schedule) => schedule,
            Err(ConductorError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        if !schedule.active {
            return Ok(());
        }

        schedule.active = false;
        self.store.save_schedule(&schedule).await?;
        self.emit(
            Event::for_schedule(events::SCHEDULE_DEACTIVATED, &schedule, "备份失败，计划已停用")
                .with_error(reason.to_string()),
        );
        warn!(schedule_id = %schedule.id, "备份失败，计划已停用");
        Ok(())
    }

    fn next_trigger(&self, schedule: &BackupSchedule, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.cron
            .next_after(&schedule.schedule, &schedule.timezone, from)
    }

    fn validate_schedule(&self, schedule: &BackupSchedule) -> Result<()> {
        self.registry.get(&schedule.scope.kind)?;
        self.cron.next_after(&schedule.schedule, &schedule.timezone, self.clock.now())?;

        let mut errors = Vec::new();
        if schedule.retention_days == 0 {
            errors.push(ValidationError::invalid("retention_days", "保留天数必须为正整数"));
        } else if schedule.retention_days > MAX_RETENTION_DAYS {
            errors.push(ValidationError::invalid(
                "retention_days",
                format!("保留天数不能超过 {MAX_RETENTION_DAYS}"),
            ));
        }
        if schedule.max_backups == 0 {
            errors.push(ValidationError::invalid("max_backups", "最大备份数必须为正整数"));
        }
        if schedule.description.chars().count() > DESCRIPTION_MAX_LEN {
            errors.push(description_too_long());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConductorError::Validation(errors))
        }
    }
}

/// 时间相加，超出可表示范围时返回校验错误
pub fn checked_offset(
    from: DateTime<Utc>,
    delta: Duration,
    field: &str,
) -> Result<DateTime<Utc>> {
    from.checked_add_signed(delta).ok_or_else(|| {
        ConductorError::Validation(vec![ValidationError::invalid(
            field,
            "时间超出可表示范围",
        )])
    })
}

fn description_too_long() -> ValidationError {
    ValidationError::invalid(
        "description",
        format!("描述不能超过 {DESCRIPTION_MAX_LEN} 个字符"),
    )
}

fn validate_description(description: &str) -> Result<()> {
    if description.chars().count() > DESCRIPTION_MAX_LEN {
        return Err(ConductorError::Validation(vec![description_too_long()]));
    }
    Ok(())
}
