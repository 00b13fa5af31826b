use chrono::{DateTime, Utc};
use conductor_core::{
    error::{ConductorError, Result},
    models::{Backup, BackupSchedule, UserInput},
};
use serde_json::Value;

/// # NodeConductor CLI 日志系统使用说明
///
/// 库代码只使用 `tracing` 宏，日志配置由 `main.rs` 调用 `setup_logging()` 完成。
///
/// ## 日志配置选项
///
/// - `-v, --verbose`：启用详细日志模式（DEBUG 级别）
/// - `RUST_LOG`：标准的 Rust 日志级别控制（如 `debug`, `info`, `warn`, `error`）
/// - `CONDUCTOR_LOG_FILE`：日志文件路径，设置后日志输出到文件而非终端
///
/// ## 使用示例
///
/// ```bash
/// # 常驻调度，日志写入文件
/// CONDUCTOR_LOG_FILE=conductor.log conductor-cli run
///
/// # 只看调度器的调试日志
/// RUST_LOG=conductor_core::scheduler=debug conductor-cli poll
/// ```
pub fn setup_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    // 根据verbose参数和环境变量确定日志级别
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 检查环境变量，决定是否输出到文件
    if let Ok(log_file) = std::env::var("CONDUCTOR_LOG_FILE") {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
        {
            Ok(file) => {
                // 输出到文件 - 使用详细格式便于调试
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(file)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .init();
                return;
            }
            Err(e) => eprintln!("无法打开日志文件 {log_file}: {e}，改为输出到终端"),
        }
    }

    // 输出到终端 - 使用简洁格式，用户友好
    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// 解析 `--input` 传入的 JSON 对象
pub fn parse_input(raw: Option<&str>) -> Result<UserInput> {
    let Some(raw) = raw else {
        return Ok(UserInput::new());
    };

    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(ConductorError::custom(format!(
            "恢复参数必须是 JSON 对象，实际为: {other}"
        ))),
    }
}

fn format_time(instant: Option<DateTime<Utc>>) -> String {
    instant
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// 备份列表中的一行
pub fn format_backup_line(backup: &Backup) -> String {
    format!(
        "{}  {:<6}  {}  创建: {}  保留至: {}  {}",
        backup.id,
        backup.state.display_name(),
        backup.scope,
        format_time(Some(backup.created_at)),
        format_time(backup.kept_until),
        backup.description
    )
}

/// 计划列表中的一行
pub fn format_schedule_line(schedule: &BackupSchedule) -> String {
    let status = if schedule.active { "启用" } else { "停用" };
    format!(
        "{}  {}  {}  '{}' ({})  保留 {} 天/最多 {} 个  下次触发: {}  {}",
        schedule.id,
        status,
        schedule.scope,
        schedule.schedule,
        schedule.timezone,
        schedule.retention_days,
        schedule.max_backups,
        format_time(schedule.next_trigger_at),
        schedule.description
    )
}
