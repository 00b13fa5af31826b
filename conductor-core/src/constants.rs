/// 调度器相关常量
pub mod scheduler {
    /// 默认调度轮询间隔（秒）
    pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

    /// 时区未配置时使用的兜底时区
    pub const FALLBACK_TIMEZONE: &str = "UTC";

    /// 调度生成的备份描述
    pub const SCHEDULED_BACKUP_DESCRIPTION: &str = "scheduled backup";

    /// 计划锁超过该时长（秒）视为崩溃遗留
    pub const SCHEDULE_LOCK_TTL_SECS: i64 = 10 * 60;
}

/// 策略调用截止时间
pub mod deadlines {
    /// 备份默认截止时间: 6 小时
    pub const DEFAULT_BACKUP_SECS: u64 = 6 * 60 * 60;

    /// 恢复默认截止时间: 12 小时
    pub const DEFAULT_RESTORE_SECS: u64 = 12 * 60 * 60;

    /// 删除默认截止时间: 1 小时
    pub const DEFAULT_DELETE_SECS: u64 = 60 * 60;

    /// 截止时间上限: 30 天
    pub const MAX_DEADLINE_SECS: u64 = 30 * 24 * 60 * 60;
}

/// 备份实体相关常量
pub mod backup {
    /// 描述字段最大长度（字符）
    pub const DESCRIPTION_MAX_LEN: usize = 500;

    /// 保留天数上限: 100 年
    pub const MAX_RETENTION_DAYS: u32 = 36_500;
}

/// cron 表达式相关常量
pub mod cron {
    /// 标准cron表达式字段数: 分 时 日 月 周
    pub const CRON_FIELDS_COUNT: usize = 5;

    /// 查找下一次触发时间时向前搜索的最大年数
    pub const MAX_SEARCH_YEARS: i32 = 5;
}

/// 数据库相关常量
pub mod db {
    /// 默认数据库文件
    pub const DEFAULT_DB_PATH: &str = "conductor.db";

    /// Actor 消息通道容量
    pub const CHANNEL_CAPACITY: usize = 100;
}

/// 配置文件相关常量
pub mod config {
    /// 按优先级查找的配置文件
    pub const CONFIG_FILE_CANDIDATES: [&str; 3] =
        ["config.toml", "conductor.toml", ".conductor.toml"];

    /// 默认配置文件名
    pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
}

/// 事件类型名
pub mod events {
    pub const BACKUP_CREATION_SCHEDULED: &str = "backup_creation_scheduled";
    pub const BACKUP_CREATION_SUCCEEDED: &str = "backup_creation_succeeded";
    pub const BACKUP_CREATION_FAILED: &str = "backup_creation_failed";
    pub const BACKUP_RESTORATION_SCHEDULED: &str = "backup_restoration_scheduled";
    pub const BACKUP_RESTORATION_SUCCEEDED: &str = "backup_restoration_succeeded";
    pub const BACKUP_RESTORATION_FAILED: &str = "backup_restoration_failed";
    pub const BACKUP_DELETION_SCHEDULED: &str = "backup_deletion_scheduled";
    pub const BACKUP_DELETION_SUCCEEDED: &str = "backup_deletion_succeeded";
    pub const BACKUP_DELETION_FAILED: &str = "backup_deletion_failed";
    pub const SCHEDULE_CREATED: &str = "schedule_created";
    pub const SCHEDULE_UPDATED: &str = "schedule_updated";
    pub const SCHEDULE_DELETED: &str = "schedule_deleted";
    pub const SCHEDULE_ACTIVATED: &str = "schedule_activated";
    pub const SCHEDULE_DEACTIVATED: &str = "schedule_deactivated";
    /// 调度轮次中单个条目处理失败
    pub const PASS_ITEM_FAILED: &str = "pass_item_failed";
}
