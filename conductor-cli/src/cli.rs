use crate::project_info::{metadata, version_info};
use clap::{Args, Parser, Subcommand};
use conductor_core::models::ScopeRef;
use std::path::PathBuf;

/// 备份相关命令
#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// 立即为指定资源创建一次备份
    Create {
        #[command(flatten)]
        scope: ScopeArgs,
        /// 备份描述
        #[arg(long, default_value = "")]
        description: String,
        /// 保留天数，不指定则永久保留
        #[arg(long)]
        keep_days: Option<u32>,
    },
    /// 列出备份
    List {
        /// 资源类型
        #[arg(long)]
        kind: Option<String>,
        /// 资源 ID
        #[arg(long)]
        scope_id: Option<String>,
        /// 所属备份计划
        #[arg(long)]
        schedule: Option<String>,
        /// 备份状态，例如 ready、erred
        #[arg(long)]
        state: Option<String>,
        /// 描述包含的文字
        #[arg(long)]
        description: Option<String>,
    },
    /// 显示单个备份的详细信息
    Show {
        /// 备份 ID
        backup_id: String,
    },
    /// 从备份恢复出新资源
    Restore {
        /// 备份 ID
        backup_id: String,
        /// 恢复参数（JSON 对象），例如 '{"name": "web-restored"}'
        #[arg(long)]
        input: Option<String>,
    },
    /// 删除备份
    Delete {
        /// 备份 ID
        backup_id: String,
    },
}

/// 备份计划相关命令
#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// 创建备份计划
    Create {
        #[command(flatten)]
        scope: ScopeArgs,
        /// cron 表达式，例如 "0 2 * * *" 表示每天凌晨2点
        #[arg(long = "cron", help = "cron 表达式，例如 '0 2 * * *' 表示每天凌晨2点")]
        schedule: String,
        /// IANA 时区，例如 Europe/Tallinn
        #[arg(long)]
        timezone: Option<String>,
        /// 备份保留天数
        #[arg(long)]
        retention_days: u32,
        /// 最多保留的备份数量
        #[arg(long)]
        max_backups: u16,
        /// 创建后不启用
        #[arg(long)]
        inactive: bool,
        /// 计划描述
        #[arg(long, default_value = "")]
        description: String,
    },
    /// 列出备份计划
    List {
        /// 只显示启用（true）或停用（false）的计划
        #[arg(long)]
        active: Option<bool>,
        /// 描述包含的文字
        #[arg(long)]
        description: Option<String>,
    },
    /// 显示单个备份计划
    Show {
        /// 计划 ID
        schedule_id: String,
    },
    /// 修改备份计划
    Update {
        /// 计划 ID
        schedule_id: String,
        #[arg(long = "cron")]
        schedule: Option<String>,
        #[arg(long)]
        timezone: Option<String>,
        #[arg(long)]
        retention_days: Option<u32>,
        #[arg(long)]
        max_backups: Option<u16>,
        #[arg(long)]
        description: Option<String>,
    },
    /// 启用备份计划
    Activate {
        /// 计划 ID
        schedule_id: String,
    },
    /// 停用备份计划
    Deactivate {
        /// 计划 ID
        schedule_id: String,
    },
    /// 删除备份计划（已有备份保留）
    Delete {
        /// 计划 ID
        schedule_id: String,
    },
}

/// 资源引用
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// 资源类型，对应配置中的 [[strategies]] kind
    #[arg(long)]
    pub kind: String,
    /// 资源 ID
    #[arg(long = "scope-id")]
    pub id: String,
}

impl From<ScopeArgs> for ScopeRef {
    fn from(args: ScopeArgs) -> Self {
        ScopeRef::new(args.kind, args.id)
    }
}

/// NodeConductor CLI - 备份编排运维工具
#[derive(Parser)]
#[command(name = "conductor-cli")]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = version_info::CLI_VERSION)]
#[command(long_about = metadata::display::DESCRIPTION_LONG)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径，不指定时在当前目录依次查找 config.toml、conductor.toml、.conductor.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 首次使用时初始化，创建配置文件和数据库
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 常驻运行调度器，直到收到 Ctrl-C
    Run,
    /// 执行一轮到期计划触发
    FireDue,
    /// 执行一轮过期备份回收
    ReapExpired,
    /// 执行一轮执行中备份的状态轮询
    Poll,
    /// 备份管理
    #[command(subcommand)]
    Backup(BackupCommand),
    /// 备份计划管理
    #[command(subcommand)]
    Schedule(ScheduleCommand),
}
