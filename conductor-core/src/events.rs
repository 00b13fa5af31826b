use serde::Serialize;
use tracing::{info, warn};

use crate::models::{Backup, BackupSchedule, ScopeRef};

/// 核心在每次状态变化时发出的结构化事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub event_type: &'static str,
    pub message: String,
    pub backup_id: Option<String>,
    pub schedule_id: Option<String>,
    pub scope: Option<ScopeRef>,
    pub error: Option<String>,
}

impl Event {
    pub fn new(event_type: &'static str, message: impl Into<String>) -> Self {
        Self {
            event_type,
            message: message.into(),
            backup_id: None,
            schedule_id: None,
            scope: None,
            error: None,
        }
    }

    pub fn for_backup(event_type: &'static str, backup: &Backup, message: impl Into<String>) -> Self {
        Self {
            backup_id: Some(backup.id.clone()),
            schedule_id: backup.schedule_id.clone(),
            scope: Some(backup.scope.clone()),
            ..Self::new(event_type, message)
        }
    }

    pub fn for_schedule(
        event_type: &'static str,
        schedule: &BackupSchedule,
        message: impl Into<String>,
    ) -> Self {
        Self {
            schedule_id: Some(schedule.id.clone()),
            scope: Some(schedule.scope.clone()),
            ..Self::new(event_type, message)
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// 事件接收方，核心自身不消费事件
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// 把事件写入 tracing 日志
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        let scope = event.scope.as_ref().map(ToString::to_string).unwrap_or_default();
        let backup_id = event.backup_id.as_deref().unwrap_or("");
        let schedule_id = event.schedule_id.as_deref().unwrap_or("");

        match &event.error {
            Some(error) => warn!(
                event_type = event.event_type,
                backup_id,
                schedule_id,
                scope = %scope,
                error = %error,
                "{}",
                event.message
            ),
            None => info!(
                event_type = event.event_type,
                backup_id,
                schedule_id,
                scope = %scope,
                "{}",
                event.message
            ),
        }
    }
}
