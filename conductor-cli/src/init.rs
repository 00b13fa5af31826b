use conductor_core::{config::AppConfig, db::DuckDbManager, error::Result};
use std::path::Path;
use tracing::{info, warn};

/// 运行独立的初始化流程
pub async fn run_init(config_path: &Path, force: bool) -> Result<()> {
    info!("🎼 NodeConductor 初始化");
    info!("======================");

    // 检查是否已经初始化过
    if !force && config_path.exists() {
        warn!("⚠️  检测到已存在的配置文件: {}", config_path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: conductor-cli init --force");
        return Ok(());
    }

    info!("📋 步骤 1: 创建配置文件");

    let config = AppConfig::default();
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    config.save_to_file(config_path)?;
    info!("   ✅ 创建配置文件: {}", config_path.display());

    info!("📋 步骤 2: 初始化数据库");

    let db_path = config.get_database_path();
    DuckDbManager::new(&db_path).await?;
    info!("   ✅ 创建DuckDB数据库: {}", db_path.display());

    info!("🎉 初始化完成！");
    info!("");
    info!("📝 接下来的步骤:");
    info!("   1️⃣  在 {} 中添加 [[strategies]]，为每种资源类型配置策略程序", config_path.display());
    info!("   2️⃣  运行 'conductor-cli schedule create ...' 创建备份计划");
    info!("   3️⃣  运行 'conductor-cli run' 常驻调度，或通过 cron 定期执行 fire-due / reap-expired / poll");
    info!("");
    info!("💡 提示:");
    info!("   - 使用 'conductor-cli --help' 查看所有可用命令");

    Ok(())
}
