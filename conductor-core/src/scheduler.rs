//! 周期调度器
//!
//! 每一轮依次包含三个相互独立的处理:
//! 触发到期计划、回收过期备份、轮询执行中的备份。
//! 单个条目失败只记录事件，不影响同一轮的其他条目；
//! 存储错误会中止当前处理，但不会终止进程。

use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::events;
use crate::events::Event;
use crate::orchestrator::{Orchestrator, ScheduleRun};
use crate::{ConductorError, Result};

/// 一次处理的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// 实际推进的条目数
    pub processed: usize,
    pub failed: usize,
    /// 因存储错误中止
    pub aborted: bool,
}

impl PassReport {
    fn aborted() -> Self {
        Self {
            aborted: true,
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.aborted
    }
}

/// 一轮调度的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fired: PassReport,
    pub reaped: PassReport,
    pub polled: PassReport,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.fired.is_clean() && self.reaped.is_clean() && self.polled.is_clean()
    }
}

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// 记录单个条目的失败
    fn record_failure(&self, pass: &'static str, item_id: &str, err: &ConductorError) {
        warn!(pass, item_id, error_kind = err.kind(), "条目处理失败: {err}");
        self.orchestrator.emit(
            Event::new(events::PASS_ITEM_FAILED, format!("{pass}: {item_id} 处理失败"))
                .with_error(err.to_string()),
        );
    }

    /// 触发所有到期且启用的计划
    #[instrument(skip(self))]
    pub async fn fire_due_schedules(&self) -> Result<PassReport> {
        let now = self.orchestrator.now();
        let due = self.orchestrator.store().list_due_schedules(now).await?;
        let mut report = PassReport::default();

        for schedule in due {
            match self.orchestrator.execute_schedule(&schedule.id).await {
                Ok(ScheduleRun::Fired { .. }) => report.processed += 1,
                Ok(run) => debug!(schedule_id = %schedule.id, ?run, "计划未触发"),
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => {
                    report.failed += 1;
                    self.record_failure("fire_due", &schedule.id, &e);
                }
            }
        }

        Ok(report)
    }

    /// 删除超过保留期限的就绪备份
    #[instrument(skip(self))]
    pub async fn reap_expired(&self) -> Result<PassReport> {
        let now = self.orchestrator.now();
        let expired = self
            .orchestrator
            .store()
            .list_expired_ready_backups(now)
            .await?;
        let mut report = PassReport::default();

        for backup in expired {
            match self.orchestrator.start_delete(&backup.id).await {
                Ok(_) => {
                    report.processed += 1;
                    info!(backup_id = %backup.id, "过期备份开始删除");
                }
                Err(e) if e.is_storage() => return Err(e),
                // 其他轮询者或手动操作已经推进了状态
                Err(ConductorError::InvalidState { .. }) => {
                    debug!(backup_id = %backup.id, "备份状态已变化，跳过回收");
                }
                Err(e) => {
                    report.failed += 1;
                    self.record_failure("reap_expired", &backup.id, &e);
                }
            }
        }

        Ok(report)
    }

    /// 轮询所有执行中的备份
    #[instrument(skip(self))]
    pub async fn poll_executing(&self) -> Result<PassReport> {
        let executing = self.orchestrator.store().list_executing_backups().await?;
        let mut report = PassReport::default();

        for backup in executing {
            match self.orchestrator.apply_poll_result(&backup).await {
                Ok(Some(_)) => report.processed += 1,
                Ok(None) => {}
                Err(e) if e.is_storage() => return Err(e),
                Err(ConductorError::InvalidState { .. }) => {
                    debug!(backup_id = %backup.id, "备份状态已被其他轮询推进");
                }
                Err(e) => {
                    report.failed += 1;
                    self.record_failure("poll_executing", &backup.id, &e);
                }
            }
        }

        Ok(report)
    }

    /// 执行一轮调度，三个处理并发进行
    pub async fn tick(&self) -> TickReport {
        let (fired, reaped, polled) = tokio::join!(
            self.fire_due_schedules(),
            self.reap_expired(),
            self.poll_executing()
        );

        TickReport {
            fired: settle("fire_due", fired),
            reaped: settle("reap_expired", reaped),
            polled: settle("poll_executing", polled),
        }
    }

    /// 按固定间隔运行，直到收到取消信号
    pub async fn run(&self, cancel_token: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "调度器已启动");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            select! {
                biased;
                _ = cancel_token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let report = self.tick().await;
            if report.is_clean() {
                debug!(?report, "调度轮次完成");
            } else {
                warn!(?report, "调度轮次存在失败条目");
            }
        }

        info!("调度器已停止");
    }
}

fn settle(pass: &'static str, result: Result<PassReport>) -> PassReport {
    match result {
        Ok(report) => report,
        Err(e) => {
            error!(pass, "存储错误，中止本轮处理: {e}");
            PassReport::aborted()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::DuckDbManager;
    use crate::executor::{PollState, TaskExecutor};
    use crate::models::{Backup, BackupState, Metadata, ScopeRef};
    use crate::orchestrator::{BackupOptions, ScheduleDraft};
    use crate::store::Store;
    use crate::strategy::StrategyRegistry;
    use crate::testing::{FakeStrategy, RecordingEventSink, ScriptedExecutor};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    struct Harness {
        scheduler: Scheduler,
        store: Arc<dyn Store>,
        orchestrator: Arc<Orchestrator>,
        strategy: Arc<FakeStrategy>,
        executor: Arc<ScriptedExecutor>,
        events: Arc<RecordingEventSink>,
        clock: ManualClock,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    async fn harness() -> Harness {
        let store: Arc<dyn Store> = Arc::new(DuckDbManager::new_memory().await.unwrap());
        let strategy = Arc::new(FakeStrategy::new("instance"));
        let registry = Arc::new(StrategyRegistry::new().with(strategy.clone()));
        let executor = Arc::new(ScriptedExecutor::new());
        let events = Arc::new(RecordingEventSink::new());
        let clock = ManualClock::new(start());

        let orchestrator = Arc::new(
            Orchestrator::new(store.clone(), registry, executor.clone())
                .with_clock(Arc::new(clock.clone()))
                .with_events(events.clone()),
        );

        Harness {
            scheduler: Scheduler::new(orchestrator.clone(), Duration::from_secs(60)),
            store,
            orchestrator,
            strategy,
            executor,
            events,
            clock,
        }
    }

    fn scope() -> ScopeRef {
        ScopeRef::new("instance", "inst-1")
    }

    fn ready_backup(id: &str, kept_until: Option<DateTime<Utc>>) -> Backup {
        Backup {
            id: id.to_string(),
            scope: scope(),
            schedule_id: None,
            state: BackupState::Ready,
            kept_until,
            created_at: start() - chrono::Duration::days(2),
            metadata: Metadata::new(),
            result_id: None,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_poll_pass_confirms_backup() {
        let h = harness().await;
        let backup = h
            .orchestrator
            .create_backup(scope(), BackupOptions::default())
            .await
            .unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("snapshots".into(), json!(["sysS", "dataS"]));
        h.executor.set(
            "r-1",
            PollState::Done {
                metadata: Some(metadata),
            },
        );

        let report = h.scheduler.poll_executing().await.unwrap();
        assert_eq!(report.processed, 1);

        let stored = h.store.get_backup(&backup.id).await.unwrap();
        assert_eq!(stored.state, BackupState::Ready);
        assert_eq!(stored.metadata["snapshots"], json!(["sysS", "dataS"]));

        // 已结束的备份不会再被轮询
        let report = h.scheduler.poll_executing().await.unwrap();
        assert_eq!(report, PassReport::default());
    }

    #[tokio::test]
    async fn test_reap_pass_deletes_expired_only() {
        let h = harness().await;
        h.store
            .create_backup(&ready_backup("expired", Some(start() - chrono::Duration::minutes(1))))
            .await
            .unwrap();
        h.store
            .create_backup(&ready_backup("kept", Some(start() + chrono::Duration::days(1))))
            .await
            .unwrap();
        h.store
            .create_backup(&ready_backup("forever", None))
            .await
            .unwrap();

        let report = h.scheduler.reap_expired().await.unwrap();
        assert_eq!(report.processed, 1);

        assert_eq!(
            h.store.get_backup("expired").await.unwrap().state,
            BackupState::Deleting
        );
        assert_eq!(h.store.get_backup("kept").await.unwrap().state, BackupState::Ready);
        assert_eq!(
            h.store.get_backup("forever").await.unwrap().state,
            BackupState::Ready
        );
        assert_eq!(h.executor.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_fire_pass_runs_due_schedules() {
        let h = harness().await;
        let schedule = h
            .orchestrator
            .create_schedule(ScheduleDraft {
                scope: scope(),
                schedule: "*/5 * * * *".to_string(),
                timezone: None,
                retention_days: 1,
                max_backups: 2,
                active: true,
                description: String::new(),
            })
            .await
            .unwrap();

        let report = h.scheduler.fire_due_schedules().await.unwrap();
        assert_eq!(report.processed, 0);

        h.clock.advance(chrono::Duration::minutes(5));
        let report = h.scheduler.fire_due_schedules().await.unwrap();
        assert_eq!(report.processed, 1);

        let stored = h.store.get_schedule(&schedule.id).await.unwrap();
        assert_eq!(
            stored.next_trigger_at,
            Some(start() + chrono::Duration::minutes(10))
        );
    }

    #[tokio::test]
    async fn test_per_item_failure_does_not_abort_pass() {
        let h = harness().await;
        for _ in 0..2 {
            h.orchestrator
                .create_schedule(ScheduleDraft {
                    scope: scope(),
                    schedule: "*/5 * * * *".to_string(),
                    timezone: None,
                    retention_days: 1,
                    max_backups: 2,
                    active: true,
                    description: String::new(),
                })
                .await
                .unwrap();
        }
        h.strategy.refuse_scope("实例不可用");
        h.clock.advance(chrono::Duration::minutes(5));

        let report = h.scheduler.fire_due_schedules().await.unwrap();
        assert_eq!(report.failed, 2);
        assert!(!report.aborted);
        assert_eq!(h.events.count(events::PASS_ITEM_FAILED), 2);
        assert_eq!(h.events.count(events::SCHEDULE_DEACTIVATED), 2);
    }

    #[tokio::test]
    async fn test_tick_reports_clean_run() {
        let h = harness().await;
        let report = h.scheduler.tick().await;
        assert!(report.is_clean());
        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness().await;
        let token = CancellationToken::new();
        token.cancel();
        // 已取消的令牌让循环立即退出
        tokio::time::timeout(Duration::from_secs(5), h.scheduler.run(token))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deadline_reaches_erred_through_poll() {
        let store: Arc<dyn Store> = Arc::new(DuckDbManager::new_memory().await.unwrap());
        let strategy = Arc::new(FakeStrategy::new("instance"));
        strategy.hang();
        let registry = Arc::new(StrategyRegistry::new().with(strategy));
        let clock = ManualClock::new(start());
        let executor = Arc::new(TaskExecutor::new(
            registry.clone(),
            store.clone(),
            Arc::new(clock.clone()),
        ));
        let orchestrator = Arc::new(
            Orchestrator::new(store.clone(), registry, executor)
                .with_clock(Arc::new(clock.clone())),
        );
        let scheduler = Scheduler::new(orchestrator.clone(), Duration::from_secs(60));

        let backup = orchestrator
            .create_backup(scope(), BackupOptions::default())
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(7));
        let report = scheduler.poll_executing().await.unwrap();
        assert_eq!(report.processed, 1);

        let stored = store.get_backup(&backup.id).await.unwrap();
        assert_eq!(stored.state, BackupState::Erred);
    }
}
