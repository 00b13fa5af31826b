use chrono::{DateTime, Utc};

use crate::models::{
    Backup, BackupSchedule, Metadata, OperationKind, ScopeRef, TaskRecord, TaskStatus,
};
use crate::{ConductorError, Result};

/// backups 表的原始行
#[derive(Debug, Clone)]
pub struct BackupRow {
    pub id: String,
    pub scope_kind: String,
    pub scope_id: String,
    pub schedule_id: Option<String>,
    pub state: String,
    pub kept_until: Option<i64>,
    pub created_at: i64,
    pub metadata: String,
    pub result_id: Option<String>,
    pub description: String,
}

impl BackupRow {
    pub const COLUMNS: &'static str = "id, scope_kind, scope_id, schedule_id, state, kept_until, \
         created_at, metadata, result_id, description";

    pub fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            scope_kind: row.get(1)?,
            scope_id: row.get(2)?,
            schedule_id: row.get(3)?,
            state: row.get(4)?,
            kept_until: row.get(5)?,
            created_at: row.get(6)?,
            metadata: row.get(7)?,
            result_id: row.get(8)?,
            description: row.get(9)?,
        })
    }
}

impl TryFrom<BackupRow> for Backup {
    type Error = ConductorError;

    fn try_from(row: BackupRow) -> Result<Self> {
        Ok(Backup {
            state: row.state.parse()?,
            kept_until: row.kept_until.map(from_micros).transpose()?,
            created_at: from_micros(row.created_at)?,
            metadata: decode_metadata(&row.metadata)?,
            scope: ScopeRef::new(row.scope_kind, row.scope_id),
            id: row.id,
            schedule_id: row.schedule_id,
            result_id: row.result_id,
            description: row.description,
        })
    }
}

/// backup_schedules 表的原始行
#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub id: String,
    pub scope_kind: String,
    pub scope_id: String,
    pub schedule: String,
    pub timezone: String,
    pub retention_days: i32,
    pub max_backups: i32,
    pub next_trigger_at: Option<i64>,
    pub active: bool,
    pub description: String,
    pub created_at: i64,
}

impl ScheduleRow {
    pub const COLUMNS: &'static str = "id, scope_kind, scope_id, schedule, timezone, \
         retention_days, max_backups, next_trigger_at, active, description, created_at";

    pub fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            scope_kind: row.get(1)?,
            scope_id: row.get(2)?,
            schedule: row.get(3)?,
            timezone: row.get(4)?,
            retention_days: row.get(5)?,
            max_backups: row.get(6)?,
            next_trigger_at: row.get(7)?,
            active: row.get(8)?,
            description: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

impl TryFrom<ScheduleRow> for BackupSchedule {
    type Error = ConductorError;

    fn try_from(row: ScheduleRow) -> Result<Self> {
        let retention_days = u32::try_from(row.retention_days)
            .map_err(|_| ConductorError::custom(format!("无效的保留天数: {}", row.retention_days)))?;
        let max_backups = u16::try_from(row.max_backups)
            .map_err(|_| ConductorError::custom(format!("无效的最大备份数: {}", row.max_backups)))?;

        Ok(BackupSchedule {
            scope: ScopeRef::new(row.scope_kind, row.scope_id),
            next_trigger_at: row.next_trigger_at.map(from_micros).transpose()?,
            created_at: from_micros(row.created_at)?,
            id: row.id,
            schedule: row.schedule,
            timezone: row.timezone,
            retention_days,
            max_backups,
            active: row.active,
            description: row.description,
        })
    }
}

/// executor_tasks 表的原始行
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub operation: String,
    pub scope_kind: String,
    pub scope_id: String,
    pub status: String,
    pub metadata: Option<String>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub deadline_at: i64,
    pub submitted_at: i64,
    pub finished_at: Option<i64>,
}

impl TaskRow {
    pub const COLUMNS: &'static str = "id, operation, scope_kind, scope_id, status, metadata, \
         error_kind, error, deadline_at, submitted_at, finished_at";

    pub fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            operation: row.get(1)?,
            scope_kind: row.get(2)?,
            scope_id: row.get(3)?,
            status: row.get(4)?,
            metadata: row.get(5)?,
            error_kind: row.get(6)?,
            error: row.get(7)?,
            deadline_at: row.get(8)?,
            submitted_at: row.get(9)?,
            finished_at: row.get(10)?,
        })
    }
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = ConductorError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(TaskRecord {
            operation: row.operation.parse::<OperationKind>()?,
            status: row.status.parse::<TaskStatus>()?,
            metadata: row.metadata.as_deref().map(decode_metadata).transpose()?,
            deadline_at: from_micros(row.deadline_at)?,
            submitted_at: from_micros(row.submitted_at)?,
            finished_at: row.finished_at.map(from_micros).transpose()?,
            scope: ScopeRef::new(row.scope_kind, row.scope_id),
            id: row.id,
            error_kind: row.error_kind,
            error: row.error,
        })
    }
}

pub fn to_micros(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| ConductorError::custom(format!("无效的时间戳: {micros}")))
}

pub fn encode_metadata(metadata: &Metadata) -> Result<String> {
    Ok(serde_json::to_string(metadata)?)
}

pub fn decode_metadata(text: &str) -> Result<Metadata> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_micros_keep_precision() {
        let instant = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(from_micros(to_micros(instant)).unwrap(), instant);
    }

    #[test]
    fn test_row_with_bad_state_is_rejected() {
        let row = BackupRow {
            id: "b1".to_string(),
            scope_kind: "instance".to_string(),
            scope_id: "1".to_string(),
            schedule_id: None,
            state: "exploded".to_string(),
            kept_until: None,
            created_at: 0,
            metadata: "{}".to_string(),
            result_id: None,
            description: String::new(),
        };
        assert!(Backup::try_from(row).is_err());
    }
}
