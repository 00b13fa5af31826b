//! 持久化接口
//!
//! 编排器只通过 [`Store`] 访问数据。每个带前置状态的更新都必须原子完成:
//! 当前状态与 `from` 不一致时返回 `InvalidState`，不做任何修改。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::models::{
    Backup, BackupFilter, BackupPatch, BackupSchedule, BackupState, ScheduleFilter, TaskOutcome,
    TaskRecord,
};

#[async_trait]
pub trait Store: Send + Sync {
    // ========== 备份 ==========

    async fn create_backup(&self, backup: &Backup) -> Result<()>;

    /// 不存在时返回 `NotFound`
    async fn get_backup(&self, id: &str) -> Result<Backup>;

    /// 带前置状态检查的状态迁移，返回更新后的备份。
    /// `from == to` 时只应用补丁。
    async fn update_backup_state(
        &self,
        id: &str,
        from: BackupState,
        to: BackupState,
        patch: BackupPatch,
    ) -> Result<Backup>;

    /// 按创建时间升序返回
    async fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<Backup>>;

    /// `Ready` 且 `kept_until < now` 的备份
    async fn list_expired_ready_backups(&self, now: DateTime<Utc>) -> Result<Vec<Backup>>;

    /// 处于执行中状态且持有 `result_id` 的备份
    async fn list_executing_backups(&self) -> Result<Vec<Backup>>;

    // ========== 备份计划 ==========

    async fn create_schedule(&self, schedule: &BackupSchedule) -> Result<()>;

    async fn get_schedule(&self, id: &str) -> Result<BackupSchedule>;

    async fn save_schedule(&self, schedule: &BackupSchedule) -> Result<()>;

    /// 删除计划，并把其备份的 `schedule_id` 置空
    async fn delete_schedule(&self, id: &str) -> Result<()>;

    async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<BackupSchedule>>;

    /// 启用且 `next_trigger_at <= now` 的计划
    async fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<BackupSchedule>>;

    /// 计划级咨询锁，已被持有时返回 false
    async fn try_lock_schedule(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    async fn unlock_schedule(&self, id: &str) -> Result<()>;

    // ========== 执行器任务 ==========

    async fn create_task(&self, task: &TaskRecord) -> Result<()>;

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>>;

    /// 只覆盖仍为 `Pending` 的任务，返回是否写入
    async fn finish_task(
        &self,
        id: &str,
        outcome: &TaskOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<bool>;
}
