use crate::constants::db::CHANNEL_CAPACITY;
use crate::models::{
    Backup, BackupFilter, BackupPatch, BackupSchedule, BackupState, ScheduleFilter, TaskOutcome,
    TaskRecord,
};
use crate::store::Store;
use crate::{ConductorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::DuckDbActor;
use super::messages::DbMessage;

/// DuckDB数据库管理器
#[derive(Debug, Clone)]
pub struct DuckDbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl DuckDbManager {
    /// 创建新的DuckDB管理器
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        // 启动DuckDB Actor
        let actor = DuckDbActor::new(db_path)?;
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };

        // 初始化数据库表
        manager.init_tables().await?;

        Ok(manager)
    }

    /// 创建内存数据库管理器
    pub async fn new_memory() -> Result<Self> {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        // 启动DuckDB Actor（内存模式）
        let actor = DuckDbActor::new_memory()?;
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };

        // 初始化数据库表
        manager.init_tables().await?;

        Ok(manager)
    }

    /// 初始化数据库表
    async fn init_tables(&self) -> Result<()> {
        self.request(|respond_to| DbMessage::InitTables { respond_to })
            .await
    }

    /// 向 Actor 发送一条消息并等待响应
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| ConductorError::DuckDb("数据库Actor已关闭".to_string()))?;

        receiver
            .await
            .map_err(|_| ConductorError::DuckDb("等待数据库响应失败".to_string()))?
    }
}

#[async_trait]
impl Store for DuckDbManager {
    async fn create_backup(&self, backup: &Backup) -> Result<()> {
        let backup = backup.clone();
        self.request(|respond_to| DbMessage::CreateBackup { backup, respond_to })
            .await
    }

    async fn get_backup(&self, id: &str) -> Result<Backup> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::GetBackup { id, respond_to })
            .await
    }

    async fn update_backup_state(
        &self,
        id: &str,
        from: BackupState,
        to: BackupState,
        patch: BackupPatch,
    ) -> Result<Backup> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::UpdateBackupState {
            id,
            from,
            to,
            patch,
            respond_to,
        })
        .await
    }

    async fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<Backup>> {
        let filter = filter.clone();
        self.request(|respond_to| DbMessage::ListBackups { filter, respond_to })
            .await
    }

    async fn list_expired_ready_backups(&self, now: DateTime<Utc>) -> Result<Vec<Backup>> {
        self.request(|respond_to| DbMessage::ListExpiredReadyBackups { now, respond_to })
            .await
    }

    async fn list_executing_backups(&self) -> Result<Vec<Backup>> {
        self.request(|respond_to| DbMessage::ListExecutingBackups { respond_to })
            .await
    }

    async fn create_schedule(&self, schedule: &BackupSchedule) -> Result<()> {
        let schedule = schedule.clone();
        self.request(|respond_to| DbMessage::CreateSchedule {
            schedule,
            respond_to,
        })
        .await
    }

    async fn get_schedule(&self, id: &str) -> Result<BackupSchedule> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::GetSchedule { id, respond_to })
            .await
    }

    async fn save_schedule(&self, schedule: &BackupSchedule) -> Result<()> {
        let schedule = schedule.clone();
        self.request(|respond_to| DbMessage::SaveSchedule {
            schedule,
            respond_to,
        })
        .await
    }

    async fn delete_schedule(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::DeleteSchedule { id, respond_to })
            .await
    }

    async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<BackupSchedule>> {
        let filter = filter.clone();
        self.request(|respond_to| DbMessage::ListSchedules { filter, respond_to })
            .await
    }

    async fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<BackupSchedule>> {
        self.request(|respond_to| DbMessage::ListDueSchedules { now, respond_to })
            .await
    }

    async fn try_lock_schedule(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::TryLockSchedule {
            id,
            now,
            respond_to,
        })
        .await
    }

    async fn unlock_schedule(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::UnlockSchedule { id, respond_to })
            .await
    }

    async fn create_task(&self, task: &TaskRecord) -> Result<()> {
        let task = task.clone();
        self.request(|respond_to| DbMessage::CreateTask { task, respond_to })
            .await
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::GetTask { id, respond_to })
            .await
    }

    async fn finish_task(
        &self,
        id: &str,
        outcome: &TaskOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.to_string();
        let outcome = outcome.clone();
        self.request(|respond_to| DbMessage::FinishTask {
            id,
            outcome,
            finished_at,
            respond_to,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, OperationKind, ScopeRef, TaskStatus};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap()
    }

    fn backup(id: &str, state: BackupState, created_at: DateTime<Utc>) -> Backup {
        Backup {
            id: id.to_string(),
            scope: ScopeRef::new("instance", "inst-1"),
            schedule_id: None,
            state,
            kept_until: None,
            created_at,
            metadata: Metadata::new(),
            result_id: None,
            description: String::new(),
        }
    }

    fn schedule(id: &str) -> BackupSchedule {
        BackupSchedule {
            id: id.to_string(),
            scope: ScopeRef::new("instance", "inst-1"),
            schedule: "*/5 * * * *".to_string(),
            timezone: "UTC".to_string(),
            retention_days: 1,
            max_backups: 2,
            next_trigger_at: Some(at(5)),
            active: true,
            description: "nightly".to_string(),
            created_at: at(0),
        }
    }

    #[tokio::test]
    async fn test_backup_round_trip() {
        let db = DuckDbManager::new_memory().await.unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("snapshot_ids".to_string(), serde_json::json!(["s1", "s2"]));
        let mut original = backup("b1", BackupState::BackingUp, at(0));
        original.metadata = metadata;
        original.kept_until = Some(at(30));
        original.description = "手动备份".to_string();

        db.create_backup(&original).await.unwrap();
        let loaded = db.get_backup("b1").await.unwrap();
        assert_eq!(loaded, original);

        let err = db.get_backup("missing").await.unwrap_err();
        assert!(matches!(err, ConductorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_guarded_transition() {
        let db = DuckDbManager::new_memory().await.unwrap();
        db.create_backup(&backup("b1", BackupState::BackingUp, at(0)))
            .await
            .unwrap();

        let updated = db
            .update_backup_state(
                "b1",
                BackupState::BackingUp,
                BackupState::Ready,
                BackupPatch::default().clear_result_id(),
            )
            .await
            .unwrap();
        assert_eq!(updated.state, BackupState::Ready);

        // 第二次使用同样的前置状态必须失败
        let err = db
            .update_backup_state(
                "b1",
                BackupState::BackingUp,
                BackupState::Ready,
                BackupPatch::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::InvalidState { .. }));
        assert_eq!(db.get_backup("b1").await.unwrap().state, BackupState::Ready);
    }

    #[tokio::test]
    async fn test_expired_and_executing_queries() {
        let db = DuckDbManager::new_memory().await.unwrap();

        let mut expired = backup("expired", BackupState::Ready, at(0));
        expired.kept_until = Some(at(10));
        let mut fresh = backup("fresh", BackupState::Ready, at(1));
        fresh.kept_until = Some(at(50));
        let forever = backup("forever", BackupState::Ready, at(2));
        let mut running = backup("running", BackupState::BackingUp, at(3));
        running.result_id = Some("r1".to_string());
        let orphan = backup("orphan", BackupState::Deleting, at(4));

        for b in [&expired, &fresh, &forever, &running, &orphan] {
            db.create_backup(b).await.unwrap();
        }

        let reaped = db.list_expired_ready_backups(at(20)).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].id, "expired");

        let executing = db.list_executing_backups().await.unwrap();
        assert_eq!(executing.len(), 1);
        assert_eq!(executing[0].id, "running");
    }

    #[tokio::test]
    async fn test_delete_schedule_detaches_backups() {
        let db = DuckDbManager::new_memory().await.unwrap();
        db.create_schedule(&schedule("s1")).await.unwrap();

        let mut child = backup("b1", BackupState::Ready, at(0));
        child.schedule_id = Some("s1".to_string());
        db.create_backup(&child).await.unwrap();

        db.delete_schedule("s1").await.unwrap();

        let loaded = db.get_backup("b1").await.unwrap();
        assert_eq!(loaded.schedule_id, None);
        assert_eq!(loaded.scope, child.scope);
        assert!(matches!(
            db.get_schedule("s1").await.unwrap_err(),
            ConductorError::NotFound { .. }
        ));
        assert!(matches!(
            db.delete_schedule("s1").await.unwrap_err(),
            ConductorError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_due_schedules_and_save() {
        let db = DuckDbManager::new_memory().await.unwrap();
        let mut s = schedule("s1");
        db.create_schedule(&s).await.unwrap();

        assert!(db.list_due_schedules(at(4)).await.unwrap().is_empty());
        assert_eq!(db.list_due_schedules(at(5)).await.unwrap().len(), 1);

        s.active = false;
        db.save_schedule(&s).await.unwrap();
        assert!(db.list_due_schedules(at(10)).await.unwrap().is_empty());
        assert_eq!(db.get_schedule("s1").await.unwrap(), s);

        let filter = ScheduleFilter {
            description: Some("NIGHT".to_string()),
            ..Default::default()
        };
        assert_eq!(db.list_schedules(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_lock() {
        let db = DuckDbManager::new_memory().await.unwrap();

        assert!(db.try_lock_schedule("s1", at(0)).await.unwrap());
        assert!(!db.try_lock_schedule("s1", at(1)).await.unwrap());

        db.unlock_schedule("s1").await.unwrap();
        assert!(db.try_lock_schedule("s1", at(2)).await.unwrap());

        // 遗留锁过期后可以重新获取
        let later = at(2) + Duration::hours(1);
        assert!(db.try_lock_schedule("s1", later).await.unwrap());
    }

    #[tokio::test]
    async fn test_finish_task_only_once() {
        let db = DuckDbManager::new_memory().await.unwrap();
        let task = TaskRecord {
            id: "r1".to_string(),
            operation: OperationKind::Backup,
            scope: ScopeRef::new("instance", "inst-1"),
            status: TaskStatus::Pending,
            metadata: None,
            error_kind: None,
            error: None,
            deadline_at: at(30),
            submitted_at: at(0),
            finished_at: None,
        };
        db.create_task(&task).await.unwrap();
        assert_eq!(
            db.get_task("r1").await.unwrap().unwrap().status,
            TaskStatus::Pending
        );

        let done = TaskOutcome::Done(Some(Metadata::new()));
        assert!(db.finish_task("r1", &done, at(1)).await.unwrap());

        let failed = TaskOutcome::Failed {
            kind: "strategy_execution".to_string(),
            message: "late".to_string(),
        };
        assert!(!db.finish_task("r1", &failed, at(2)).await.unwrap());

        let stored = db.get_task("r1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Done);
        assert_eq!(stored.metadata, Some(Metadata::new()));
        assert_eq!(stored.finished_at, Some(at(1)));
        assert!(db.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data").join("conductor.db");

        {
            let db = DuckDbManager::new(&path).await.unwrap();
            db.create_schedule(&schedule("s1")).await.unwrap();
        }

        // 等待第一个 Actor 释放连接
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let db = DuckDbManager::new(&path).await.unwrap();
        assert_eq!(db.get_schedule("s1").await.unwrap().id, "s1");
    }
}
