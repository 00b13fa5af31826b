use crate::app::CliApp;
use conductor_core::{
    error::{ConductorError, Result},
    scheduler::PassReport,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 汇总一轮处理结果；有失败条目时返回错误，进程以 1 退出
fn finish_pass(name: &str, report: PassReport) -> Result<()> {
    info!(
        "📊 {}: 处理 {} 个，失败 {} 个",
        name, report.processed, report.failed
    );
    if report.is_clean() {
        Ok(())
    } else {
        Err(ConductorError::custom(format!(
            "{name} 有 {} 个条目处理失败",
            report.failed
        )))
    }
}

/// 触发所有到期计划
pub async fn run_fire_due(app: &CliApp) -> Result<()> {
    info!("⏰ 触发到期的备份计划");
    let report = app.scheduler().fire_due_schedules().await?;

    // 单次运行的进程退出前需要等待已提交的工作结束
    app.executor.wait_idle().await;
    finish_pass("fire-due", report)
}

/// 回收过期备份
pub async fn run_reap_expired(app: &CliApp) -> Result<()> {
    info!("🧹 回收超过保留期限的备份");
    let report = app.scheduler().reap_expired().await?;

    app.executor.wait_idle().await;
    finish_pass("reap-expired", report)
}

/// 轮询执行中的备份
pub async fn run_poll(app: &CliApp) -> Result<()> {
    info!("🔍 轮询执行中的备份");
    let report = app.scheduler().poll_executing().await?;
    finish_pass("poll", report)
}

/// 常驻运行调度器
pub async fn run_scheduler(app: &CliApp) -> Result<()> {
    let scheduler = app.scheduler();
    let cancel_token = CancellationToken::new();

    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("收到 Ctrl-C，正在停止调度器...");
                signal_token.cancel();
            }
            Err(e) => warn!("无法监听 Ctrl-C: {}", e),
        }
    });

    info!("🚀 调度器启动，间隔 {} 秒", app.config.scheduler.tick_interval_secs);
    scheduler.run(cancel_token).await;

    let in_flight = app.executor.in_flight();
    if in_flight > 0 {
        info!("等待 {} 个执行中的任务结束...", in_flight);
    }
    app.executor.wait_idle().await;
    info!("✅ 调度器已退出");
    Ok(())
}
