use crate::app::CliApp;
use crate::cli::ScopeArgs;
use crate::utils::{format_backup_line, parse_input};
use chrono::Duration;
use conductor_core::{
    error::Result,
    models::{BackupFilter, BackupState},
    orchestrator::{BackupOptions, RestoreOutcome, checked_offset},
};
use tracing::{info, warn};

/// 创建备份
pub async fn create_backup(
    app: &CliApp,
    scope: ScopeArgs,
    description: String,
    keep_days: Option<u32>,
) -> Result<()> {
    info!("💾 为 {}:{} 创建备份", scope.kind, scope.id);

    let kept_until = keep_days
        .map(|days| {
            checked_offset(
                app.orchestrator.now(),
                Duration::days(i64::from(days)),
                "keep_days",
            )
        })
        .transpose()?;
    let options = BackupOptions {
        kept_until,
        description: Some(description),
    };
    let backup = app.orchestrator.create_backup(scope.into(), options).await?;

    info!("✅ 备份已创建: {} (状态: {})", backup.id, backup.state.display_name());
    if backup.state.is_executing() {
        info!("⏳ 等待策略程序完成...");
        app.executor.wait_idle().await;
        info!("💡 运行 'conductor-cli poll' 更新备份状态");
    }
    Ok(())
}

/// 列出备份
pub async fn list_backups(
    app: &CliApp,
    kind: Option<String>,
    scope_id: Option<String>,
    schedule: Option<String>,
    state: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let states = match state {
        Some(state) => vec![state.parse::<BackupState>()?],
        None => Vec::new(),
    };
    let filter = BackupFilter {
        scope_kind: kind,
        scope_ids: scope_id.map(|id| vec![id]),
        schedule_id: schedule,
        states,
        description,
    };

    let backups = app.orchestrator.list_backups(&filter).await?;
    if backups.is_empty() {
        info!("📦 暂无备份记录");
        return Ok(());
    }

    info!("📦 共 {} 个备份:", backups.len());
    for backup in &backups {
        info!("   {}", format_backup_line(backup));
    }
    Ok(())
}

/// 显示备份详情
pub async fn show_backup(app: &CliApp, backup_id: &str) -> Result<()> {
    let backup = app.orchestrator.get_backup(backup_id).await?;
    info!("📦 备份 {}", backup.id);
    info!("{}", serde_json::to_string_pretty(&backup)?);
    Ok(())
}

/// 从备份恢复
pub async fn restore_backup(app: &CliApp, backup_id: &str, input: Option<&str>) -> Result<()> {
    let input = parse_input(input)?;
    let backup = app.orchestrator.get_backup(backup_id).await?;
    let provisioner = app.provisioner(&backup.scope.kind)?;

    info!("♻️  从备份 {} 恢复", backup_id);
    match app
        .orchestrator
        .restore(backup_id, input, provisioner.as_ref())
        .await?
    {
        RestoreOutcome::Started { backup, new_scope } => {
            info!("✅ 新资源已创建: {}，恢复任务已提交", new_scope);
            app.executor.wait_idle().await;
            info!("💡 运行 'conductor-cli poll' 更新备份 {} 的状态", backup.id);
        }
        RestoreOutcome::Rejected(errors) => {
            warn!("❌ 恢复请求未通过校验:");
            for error in &errors {
                warn!("   - {} [{}]: {}", error.field, error.code, error.message);
            }
            return Err(conductor_core::error::ConductorError::Validation(errors));
        }
    }
    Ok(())
}

/// 删除备份
pub async fn delete_backup(app: &CliApp, backup_id: &str) -> Result<()> {
    let backup = app.orchestrator.start_delete(backup_id).await?;
    info!("🗑️  备份 {} 开始删除", backup.id);
    app.executor.wait_idle().await;
    info!("💡 运行 'conductor-cli poll' 确认删除结果");
    Ok(())
}
