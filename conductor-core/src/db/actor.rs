use crate::constants::scheduler::SCHEDULE_LOCK_TTL_SECS;
use crate::models::{
    Backup, BackupFilter, BackupPatch, BackupSchedule, BackupState, ScheduleFilter, TaskOutcome,
    TaskRecord, TaskStatus,
};
use crate::{ConductorError, Result};
use chrono::{DateTime, Duration, Utc};
use duckdb::{Connection, params};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::DbMessage;
use super::models::{BackupRow, ScheduleRow, TaskRow, encode_metadata, to_micros};

/// DuckDB Actor - 确保单线程访问DuckDB
///
/// 所有请求在同一个任务中顺序处理，因此"先读后写"的状态检查是原子的。
pub struct DuckDbActor {
    connection: Connection,
}

impl DuckDbActor {
    /// 创建新的DuckDB Actor
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Ok(Self { connection })
    }

    /// 创建内存DuckDB Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// 运行Actor消息循环
    pub async fn run(mut self, mut receiver: mpsc::Receiver<DbMessage>) {
        info!("DuckDB Actor 已启动");

        while let Some(message) = receiver.recv().await {
            self.handle_message(message);
        }

        info!("DuckDB Actor 已关闭");
    }

    /// 处理数据库消息
    fn handle_message(&mut self, message: DbMessage) {
        match message {
            DbMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.init_tables());
            }
            DbMessage::CreateBackup { backup, respond_to } => {
                let _ = respond_to.send(self.create_backup(&backup));
            }
            DbMessage::GetBackup { id, respond_to } => {
                let _ = respond_to.send(self.get_backup(&id));
            }
            DbMessage::UpdateBackupState {
                id,
                from,
                to,
                patch,
                respond_to,
            } => {
                let _ = respond_to.send(self.update_backup_state(&id, from, to, &patch));
            }
            DbMessage::ListBackups { filter, respond_to } => {
                let _ = respond_to.send(self.list_backups(&filter));
            }
            DbMessage::ListExpiredReadyBackups { now, respond_to } => {
                let _ = respond_to.send(self.list_expired_ready_backups(now));
            }
            DbMessage::ListExecutingBackups { respond_to } => {
                let _ = respond_to.send(self.list_executing_backups());
            }
            DbMessage::CreateSchedule {
                schedule,
                respond_to,
            } => {
                let _ = respond_to.send(self.create_schedule(&schedule));
            }
            DbMessage::GetSchedule { id, respond_to } => {
                let _ = respond_to.send(self.get_schedule(&id));
            }
            DbMessage::SaveSchedule {
                schedule,
                respond_to,
            } => {
                let _ = respond_to.send(self.save_schedule(&schedule));
            }
            DbMessage::DeleteSchedule { id, respond_to } => {
                let _ = respond_to.send(self.delete_schedule(&id));
            }
            DbMessage::ListSchedules { filter, respond_to } => {
                let _ = respond_to.send(self.list_schedules(&filter));
            }
            DbMessage::ListDueSchedules { now, respond_to } => {
                let _ = respond_to.send(self.list_due_schedules(now));
            }
            DbMessage::TryLockSchedule {
                id,
                now,
                respond_to,
            } => {
                let _ = respond_to.send(self.try_lock_schedule(&id, now));
            }
            DbMessage::UnlockSchedule { id, respond_to } => {
                let _ = respond_to.send(self.unlock_schedule(&id));
            }
            DbMessage::CreateTask { task, respond_to } => {
                let _ = respond_to.send(self.create_task(&task));
            }
            DbMessage::GetTask { id, respond_to } => {
                let _ = respond_to.send(self.get_task(&id));
            }
            DbMessage::FinishTask {
                id,
                outcome,
                finished_at,
                respond_to,
            } => {
                let _ = respond_to.send(self.finish_task(&id, &outcome, finished_at));
            }
        }
    }

    /// 初始化数据库表
    fn init_tables(&mut self) -> Result<()> {
        debug!("正在初始化DuckDB表...");

        // 读取并执行SQL初始化脚本
        let sql_content = include_str!("../../migrations/init_duckdb.sql");

        // 按分号分割SQL语句并执行
        for statement in sql_content.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                self.connection.execute(trimmed, [])?;
            }
        }

        info!("DuckDB表初始化完成");
        Ok(())
    }

    // ========== 备份 ==========

    fn create_backup(&mut self, backup: &Backup) -> Result<()> {
        self.connection.execute(
            "INSERT INTO backups (id, scope_kind, scope_id, schedule_id, state, kept_until, \
             created_at, metadata, result_id, description) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                backup.id,
                backup.scope.kind,
                backup.scope.id,
                backup.schedule_id,
                backup.state.as_str(),
                backup.kept_until.map(to_micros),
                to_micros(backup.created_at),
                encode_metadata(&backup.metadata)?,
                backup.result_id,
                backup.description,
            ],
        )?;
        debug!(backup_id = %backup.id, state = %backup.state, "备份记录已创建");
        Ok(())
    }

    fn get_backup(&mut self, id: &str) -> Result<Backup> {
        self.query_backups("WHERE id = ?", params![id])?
            .into_iter()
            .next()
            .ok_or_else(|| ConductorError::not_found("备份", id))
    }

    fn update_backup_state(
        &mut self,
        id: &str,
        from: BackupState,
        to: BackupState,
        patch: &BackupPatch,
    ) -> Result<Backup> {
        let mut backup = self.get_backup(id)?;
        if backup.state != from {
            return Err(ConductorError::invalid_state(backup.state, from.as_str()));
        }

        patch.apply_to(&mut backup);
        backup.state = to;

        let changed = self.connection.execute(
            "UPDATE backups SET state = ?, kept_until = ?, metadata = ?, result_id = ? \
             WHERE id = ? AND state = ?",
            params![
                to.as_str(),
                backup.kept_until.map(to_micros),
                encode_metadata(&backup.metadata)?,
                backup.result_id,
                id,
                from.as_str(),
            ],
        )?;

        if changed == 0 {
            return Err(ConductorError::invalid_state("unknown", from.as_str()));
        }

        debug!(backup_id = %id, from = %from, to = %to, "备份状态已更新");
        Ok(backup)
    }

    fn list_backups(&mut self, filter: &BackupFilter) -> Result<Vec<Backup>> {
        let backups = self.query_backups("", [])?;
        Ok(backups.into_iter().filter(|b| filter.matches(b)).collect())
    }

    fn list_expired_ready_backups(&mut self, now: DateTime<Utc>) -> Result<Vec<Backup>> {
        self.query_backups(
            "WHERE state = ? AND kept_until IS NOT NULL AND kept_until < ?",
            params![BackupState::Ready.as_str(), to_micros(now)],
        )
    }

    fn list_executing_backups(&mut self) -> Result<Vec<Backup>> {
        self.query_backups(
            "WHERE state IN (?, ?, ?) AND result_id IS NOT NULL",
            params![
                BackupState::BackingUp.as_str(),
                BackupState::Restoring.as_str(),
                BackupState::Deleting.as_str(),
            ],
        )
    }

    fn query_backups(&mut self, condition: &str, args: impl duckdb::Params) -> Result<Vec<Backup>> {
        let sql = format!(
            "SELECT {} FROM backups {} ORDER BY created_at, id",
            BackupRow::COLUMNS,
            condition
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt.query_map(args, BackupRow::from_row)?;

        let mut backups = Vec::new();
        for row in rows {
            backups.push(Backup::try_from(row?)?);
        }
        Ok(backups)
    }

    // ========== 备份计划 ==========

    fn create_schedule(&mut self, schedule: &BackupSchedule) -> Result<()> {
        self.connection.execute(
            "INSERT INTO backup_schedules (id, scope_kind, scope_id, schedule, timezone, \
             retention_days, max_backups, next_trigger_at, active, description, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                schedule.id,
                schedule.scope.kind,
                schedule.scope.id,
                schedule.schedule,
                schedule.timezone,
                i64::from(schedule.retention_days),
                i32::from(schedule.max_backups),
                schedule.next_trigger_at.map(to_micros),
                schedule.active,
                schedule.description,
                to_micros(schedule.created_at),
            ],
        )?;
        debug!(schedule_id = %schedule.id, "备份计划已创建");
        Ok(())
    }

    fn get_schedule(&mut self, id: &str) -> Result<BackupSchedule> {
        self.query_schedules("WHERE id = ?", params![id])?
            .into_iter()
            .next()
            .ok_or_else(|| ConductorError::not_found("备份计划", id))
    }

    fn save_schedule(&mut self, schedule: &BackupSchedule) -> Result<()> {
        let changed = self.connection.execute(
            "UPDATE backup_schedules SET schedule = ?, timezone = ?, retention_days = ?, \
             max_backups = ?, next_trigger_at = ?, active = ?, description = ? WHERE id = ?",
            params![
                schedule.schedule,
                schedule.timezone,
                i64::from(schedule.retention_days),
                i32::from(schedule.max_backups),
                schedule.next_trigger_at.map(to_micros),
                schedule.active,
                schedule.description,
                schedule.id,
            ],
        )?;

        if changed == 0 {
            return Err(ConductorError::not_found("备份计划", schedule.id.clone()));
        }
        Ok(())
    }

    fn delete_schedule(&mut self, id: &str) -> Result<()> {
        // 先确认存在，避免静默成功
        self.get_schedule(id)?;

        let tx = self.connection.transaction()?;
        tx.execute(
            "UPDATE backups SET schedule_id = NULL WHERE schedule_id = ?",
            params![id],
        )?;
        tx.execute("DELETE FROM schedule_locks WHERE schedule_id = ?", params![id])?;
        tx.execute("DELETE FROM backup_schedules WHERE id = ?", params![id])?;
        tx.commit()?;

        debug!(schedule_id = %id, "备份计划已删除");
        Ok(())
    }

    fn list_schedules(&mut self, filter: &ScheduleFilter) -> Result<Vec<BackupSchedule>> {
        let schedules = self.query_schedules("", [])?;
        Ok(schedules.into_iter().filter(|s| filter.matches(s)).collect())
    }

    fn list_due_schedules(&mut self, now: DateTime<Utc>) -> Result<Vec<BackupSchedule>> {
        self.query_schedules(
            "WHERE active AND next_trigger_at IS NOT NULL AND next_trigger_at <= ?",
            params![to_micros(now)],
        )
    }

    fn query_schedules(
        &mut self,
        condition: &str,
        args: impl duckdb::Params,
    ) -> Result<Vec<BackupSchedule>> {
        let sql = format!(
            "SELECT {} FROM backup_schedules {} ORDER BY created_at, id",
            ScheduleRow::COLUMNS,
            condition
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt.query_map(args, ScheduleRow::from_row)?;

        let mut schedules = Vec::new();
        for row in rows {
            schedules.push(BackupSchedule::try_from(row?)?);
        }
        Ok(schedules)
    }

    fn try_lock_schedule(&mut self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        // 进程崩溃留下的锁在 TTL 之后失效
        let stale_before = now - Duration::seconds(SCHEDULE_LOCK_TTL_SECS);
        self.connection.execute(
            "DELETE FROM schedule_locks WHERE schedule_id = ? AND locked_at < ?",
            params![id, to_micros(stale_before)],
        )?;

        let inserted = self.connection.execute(
            "INSERT INTO schedule_locks (schedule_id, locked_at) VALUES (?, ?) ON CONFLICT DO NOTHING",
            params![id, to_micros(now)],
        )?;
        Ok(inserted > 0)
    }

    fn unlock_schedule(&mut self, id: &str) -> Result<()> {
        self.connection
            .execute("DELETE FROM schedule_locks WHERE schedule_id = ?", params![id])?;
        Ok(())
    }

    // ========== 执行器任务 ==========

    fn create_task(&mut self, task: &TaskRecord) -> Result<()> {
        let metadata = task.metadata.as_ref().map(encode_metadata).transpose()?;
        self.connection.execute(
            "INSERT INTO executor_tasks (id, operation, scope_kind, scope_id, status, metadata, \
             error_kind, error, deadline_at, submitted_at, finished_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                task.id,
                task.operation.as_str(),
                task.scope.kind,
                task.scope.id,
                task.status.as_str(),
                metadata,
                task.error_kind,
                task.error,
                to_micros(task.deadline_at),
                to_micros(task.submitted_at),
                task.finished_at.map(to_micros),
            ],
        )?;
        Ok(())
    }

    fn get_task(&mut self, id: &str) -> Result<Option<TaskRecord>> {
        Ok(self.query_tasks("WHERE id = ?", params![id])?.into_iter().next())
    }

    fn finish_task(
        &mut self,
        id: &str,
        outcome: &TaskOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<bool> {
        let (status, metadata, error_kind, error) = match outcome {
            TaskOutcome::Done(metadata) => (
                TaskStatus::Done,
                metadata.as_ref().map(encode_metadata).transpose()?,
                None,
                None,
            ),
            TaskOutcome::Failed { kind, message } => (
                TaskStatus::Failed,
                None,
                Some(kind.clone()),
                Some(message.clone()),
            ),
        };

        let changed = self.connection.execute(
            "UPDATE executor_tasks SET status = ?, metadata = ?, error_kind = ?, error = ?, \
             finished_at = ? WHERE id = ? AND status = ?",
            params![
                status.as_str(),
                metadata,
                error_kind,
                error,
                to_micros(finished_at),
                id,
                TaskStatus::Pending.as_str(),
            ],
        )?;

        Ok(changed > 0)
    }

    fn query_tasks(&mut self, condition: &str, args: impl duckdb::Params) -> Result<Vec<TaskRecord>> {
        let sql = format!(
            "SELECT {} FROM executor_tasks {} ORDER BY submitted_at, id",
            TaskRow::COLUMNS,
            condition
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt.query_map(args, TaskRow::from_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(TaskRecord::try_from(row?)?);
        }
        Ok(tasks)
    }
}
