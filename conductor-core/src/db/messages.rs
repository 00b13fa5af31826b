use crate::Result;
use crate::models::{
    Backup, BackupFilter, BackupPatch, BackupSchedule, BackupState, ScheduleFilter, TaskOutcome,
    TaskRecord,
};
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// DuckDB数据库操作消息
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 备份 ==========
    /// 创建备份
    CreateBackup {
        backup: Backup,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 根据ID获取备份
    GetBackup {
        id: String,
        respond_to: oneshot::Sender<Result<Backup>>,
    },
    /// 带前置状态检查的状态迁移
    UpdateBackupState {
        id: String,
        from: BackupState,
        to: BackupState,
        patch: BackupPatch,
        respond_to: oneshot::Sender<Result<Backup>>,
    },
    /// 按条件列出备份
    ListBackups {
        filter: BackupFilter,
        respond_to: oneshot::Sender<Result<Vec<Backup>>>,
    },
    /// 列出已过期的就绪备份
    ListExpiredReadyBackups {
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<Vec<Backup>>>,
    },
    /// 列出执行中的备份
    ListExecutingBackups {
        respond_to: oneshot::Sender<Result<Vec<Backup>>>,
    },

    // ========== 备份计划 ==========
    /// 创建备份计划
    CreateSchedule {
        schedule: BackupSchedule,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 根据ID获取备份计划
    GetSchedule {
        id: String,
        respond_to: oneshot::Sender<Result<BackupSchedule>>,
    },
    /// 保存备份计划
    SaveSchedule {
        schedule: BackupSchedule,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 删除备份计划
    DeleteSchedule {
        id: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 按条件列出备份计划
    ListSchedules {
        filter: ScheduleFilter,
        respond_to: oneshot::Sender<Result<Vec<BackupSchedule>>>,
    },
    /// 列出到期的备份计划
    ListDueSchedules {
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<Vec<BackupSchedule>>>,
    },
    /// 获取计划锁
    TryLockSchedule {
        id: String,
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    /// 释放计划锁
    UnlockSchedule {
        id: String,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 执行器任务 ==========
    /// 创建任务
    CreateTask {
        task: TaskRecord,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 获取任务
    GetTask {
        id: String,
        respond_to: oneshot::Sender<Result<Option<TaskRecord>>>,
    },
    /// 写入任务结果
    FinishTask {
        id: String,
        outcome: TaskOutcome,
        finished_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<bool>>,
    },
}
