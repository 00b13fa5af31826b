use clap::Parser;
use conductor_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use conductor_core::{constants::config::DEFAULT_CONFIG_FILE, error::ConductorError};
use std::path::Path;
use tracing::error;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录
    setup_logging(cli.verbose);

    // `init` 命令是特例，它不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        let config_path = cli
            .config
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        if let Err(e) = run_init(config_path, force).await {
            error!("❌ 初始化失败: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // 对于其他所有命令，我们需要加载配置并初始化App
    let loaded = match &cli.config {
        Some(path) => CliApp::new_with_config(path).await,
        None => CliApp::new_with_auto_config().await,
    };
    let mut app = match loaded {
        Ok(app) => app,
        Err(e) => {
            // 检查错误的根本原因是否是ConfigNotFound
            if let Some(ConductorError::ConfigNotFound) = e.downcast_ref::<ConductorError>() {
                match &cli.config {
                    Some(path) => error!("❌ 配置文件 '{}' 未找到。", path.display()),
                    None => error!("❌ 当前目录下未找到 config.toml、conductor.toml 或 .conductor.toml。"),
                }
                error!("👉 请先运行 'conductor-cli init' 命令来创建配置文件。");
            } else {
                error!("❌ 应用初始化失败: {:#}", e);
            }
            std::process::exit(1);
        }
    };

    // 运行命令
    if let Err(e) = app.run(cli.command).await {
        error!("❌ 操作失败: {}", e);
        std::process::exit(1);
    }
}
