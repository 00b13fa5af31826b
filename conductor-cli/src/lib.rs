// 私有模块声明
mod app;
mod cli;
mod commands;
mod init;
pub mod project_info; // 公开项目信息模块
mod utils;

// 通过 pub use 精确控制对外暴露的接口
pub use app::CliApp;
pub use cli::{BackupCommand, Cli, Commands, ScheduleCommand, ScopeArgs};
pub use init::run_init;
pub use utils::setup_logging;
