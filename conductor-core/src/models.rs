use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ConductorError, Result};

/// 策略产生的不透明元数据，核心只负责原样往返
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// 调用方提供的恢复参数
pub type UserInput = serde_json::Map<String, serde_json::Value>;

/// 执行器返回的工作单元句柄
pub type ResultId = String;

/// 被备份资源的引用: 资源类型 + 资源 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeRef {
    pub kind: String,
    pub id: String,
}

impl ScopeRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// 备份状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupState {
    Ready,
    BackingUp,
    Restoring,
    Deleting,
    Erred,
    Deleted,
}

impl BackupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupState::Ready => "ready",
            BackupState::BackingUp => "backing_up",
            BackupState::Restoring => "restoring",
            BackupState::Deleting => "deleting",
            BackupState::Erred => "erred",
            BackupState::Deleted => "deleted",
        }
    }

    /// 获取状态的中文显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            BackupState::Ready => "就绪",
            BackupState::BackingUp => "备份中",
            BackupState::Restoring => "恢复中",
            BackupState::Deleting => "删除中",
            BackupState::Erred => "出错",
            BackupState::Deleted => "已删除",
        }
    }

    /// 执行器工作尚未结束的状态
    pub fn is_executing(&self) -> bool {
        matches!(
            self,
            BackupState::BackingUp | BackupState::Restoring | BackupState::Deleting
        )
    }

    /// 计入调度保留数量的状态
    pub fn is_live(&self) -> bool {
        !matches!(self, BackupState::Deleted | BackupState::Deleting)
    }

    /// 在当前状态上应用一次迁移，返回目标状态
    pub fn apply(self, transition: Transition) -> Result<BackupState> {
        use BackupState::*;

        let target = match (transition, self) {
            (Transition::StartBackup, Ready) => BackingUp,
            (Transition::StartRestore, Ready) => Restoring,
            (Transition::StartDelete, Ready) => Deleting,
            (Transition::Confirm, BackingUp) | (Transition::Confirm, Restoring) => Ready,
            (Transition::Confirm, Deleting) => Deleted,
            (Transition::Fail, BackingUp | Restoring | Deleting) => Erred,
            (transition, current) => {
                return Err(ConductorError::invalid_state(
                    current,
                    transition.expected_states(),
                ));
            }
        };

        Ok(target)
    }
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupState {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ready" => Ok(BackupState::Ready),
            "backing_up" => Ok(BackupState::BackingUp),
            "restoring" => Ok(BackupState::Restoring),
            "deleting" => Ok(BackupState::Deleting),
            "erred" => Ok(BackupState::Erred),
            "deleted" => Ok(BackupState::Deleted),
            other => Err(ConductorError::custom(format!("未知的备份状态: {other}"))),
        }
    }
}

/// 备份状态机的迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartBackup,
    StartRestore,
    StartDelete,
    /// 执行器报告成功
    Confirm,
    /// 执行器报告失败
    Fail,
}

impl Transition {
    fn expected_states(&self) -> &'static str {
        match self {
            Transition::StartBackup | Transition::StartRestore | Transition::StartDelete => {
                "ready"
            }
            Transition::Confirm | Transition::Fail => "backing_up|restoring|deleting",
        }
    }
}

/// 单次备份
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub scope: ScopeRef,
    pub schedule_id: Option<String>,
    pub state: BackupState,
    pub kept_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub result_id: Option<ResultId>,
    pub description: String,
}

impl Backup {
    /// 是否已过保留期限；未设置期限的备份永久保留
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.kept_until.is_some_and(|kept_until| kept_until < now)
    }
}

/// 状态迁移时允许同时修改的字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupPatch {
    pub metadata: Option<Metadata>,
    pub result_id: Option<Option<ResultId>>,
    pub kept_until: Option<Option<DateTime<Utc>>>,
}

impl BackupPatch {
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_result_id(mut self, result_id: ResultId) -> Self {
        self.result_id = Some(Some(result_id));
        self
    }

    pub fn clear_result_id(mut self) -> Self {
        self.result_id = Some(None);
        self
    }

    pub fn apply_to(&self, backup: &mut Backup) {
        if let Some(metadata) = &self.metadata {
            backup.metadata = metadata.clone();
        }
        if let Some(result_id) = &self.result_id {
            backup.result_id = result_id.clone();
        }
        if let Some(kept_until) = self.kept_until {
            backup.kept_until = kept_until;
        }
    }
}

/// 备份计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub id: String,
    pub scope: ScopeRef,
    /// 5 字段 cron 表达式
    pub schedule: String,
    /// IANA 时区名
    pub timezone: String,
    pub retention_days: u32,
    pub max_backups: u16,
    pub next_trigger_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl BackupSchedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_trigger_at.is_some_and(|at| at <= now)
    }
}

/// 校验错误（包括配额超限）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, "invalid", message)
    }

    pub fn quota_exceeded(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, "quota_exceeded", message)
    }

    pub fn detail(message: impl Into<String>) -> Self {
        Self::new("detail", "invalid", message)
    }

    pub fn is_quota(&self) -> bool {
        self.code == "quota_exceeded"
    }
}

/// 策略反序列化出的新资源描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScopeSpec {
    pub kind: String,
    pub attributes: Metadata,
}

/// 执行器操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Backup,
    Restore,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Backup => "backup",
            OperationKind::Restore => "restore",
            OperationKind::Delete => "delete",
        }
    }
}

impl FromStr for OperationKind {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "backup" => Ok(OperationKind::Backup),
            "restore" => Ok(OperationKind::Restore),
            "delete" => Ok(OperationKind::Delete),
            other => Err(ConductorError::custom(format!("未知的操作类型: {other}"))),
        }
    }
}

/// 执行器任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "DONE" => Ok(TaskStatus::Done),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(ConductorError::custom(format!("未知的任务状态: {other}"))),
        }
    }
}

/// 执行器持久化的工作单元
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: ResultId,
    pub operation: OperationKind,
    pub scope: ScopeRef,
    pub status: TaskStatus,
    pub metadata: Option<Metadata>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub deadline_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 工作单元的结束结果
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Done(Option<Metadata>),
    Failed { kind: String, message: String },
}

impl TaskOutcome {
    pub fn failed(error: &ConductorError) -> Self {
        TaskOutcome::Failed {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// 备份列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct BackupFilter {
    pub scope_kind: Option<String>,
    pub scope_ids: Option<Vec<String>>,
    pub schedule_id: Option<String>,
    pub states: Vec<BackupState>,
    /// 描述包含（不区分大小写）
    pub description: Option<String>,
}

impl BackupFilter {
    pub fn for_schedule(schedule_id: impl Into<String>) -> Self {
        Self {
            schedule_id: Some(schedule_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, backup: &Backup) -> bool {
        if let Some(kind) = &self.scope_kind {
            if &backup.scope.kind != kind {
                return false;
            }
        }
        if let Some(ids) = &self.scope_ids {
            if !ids.contains(&backup.scope.id) {
                return false;
            }
        }
        if let Some(schedule_id) = &self.schedule_id {
            if backup.schedule_id.as_ref() != Some(schedule_id) {
                return false;
            }
        }
        if !self.states.is_empty() && !self.states.contains(&backup.state) {
            return false;
        }
        if let Some(description) = &self.description {
            let needle = description.to_lowercase();
            if !backup.description.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}

/// 备份计划列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub scope: Option<ScopeRef>,
    pub active: Option<bool>,
    pub description: Option<String>,
}

impl ScheduleFilter {
    pub fn matches(&self, schedule: &BackupSchedule) -> bool {
        if let Some(scope) = &self.scope {
            if &schedule.scope != scope {
                return false;
            }
        }
        if let Some(active) = self.active {
            if schedule.active != active {
                return false;
            }
        }
        if let Some(description) = &self.description {
            let needle = description.to_lowercase();
            if !schedule.description.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}
