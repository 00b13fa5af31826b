use crate::app::CliApp;
use crate::utils::format_schedule_line;
use conductor_core::{
    error::Result,
    models::ScheduleFilter,
    orchestrator::{ScheduleDraft, ScheduleUpdate},
};
use tracing::info;

pub async fn create_schedule(app: &CliApp, draft: ScheduleDraft) -> Result<()> {
    let schedule = app.orchestrator.create_schedule(draft).await?;
    info!("✅ 备份计划已创建");
    info!("   {}", format_schedule_line(&schedule));
    Ok(())
}

pub async fn list_schedules(
    app: &CliApp,
    active: Option<bool>,
    description: Option<String>,
) -> Result<()> {
    let filter = ScheduleFilter {
        scope: None,
        active,
        description,
    };
    let schedules = app.orchestrator.list_schedules(&filter).await?;
    if schedules.is_empty() {
        info!("📅 暂无备份计划");
        return Ok(());
    }

    info!("📅 共 {} 个备份计划:", schedules.len());
    for schedule in &schedules {
        info!("   {}", format_schedule_line(schedule));
    }
    Ok(())
}

pub async fn show_schedule(app: &CliApp, schedule_id: &str) -> Result<()> {
    let schedule = app.orchestrator.get_schedule(schedule_id).await?;
    info!("📅 备份计划 {}", schedule.id);
    info!("{}", serde_json::to_string_pretty(&schedule)?);
    Ok(())
}

pub async fn update_schedule(app: &CliApp, schedule_id: &str, update: ScheduleUpdate) -> Result<()> {
    let schedule = app.orchestrator.update_schedule(schedule_id, update).await?;
    info!("✅ 备份计划已更新");
    info!("   {}", format_schedule_line(&schedule));
    Ok(())
}

pub async fn activate_schedule(app: &CliApp, schedule_id: &str) -> Result<()> {
    let schedule = app.orchestrator.activate(schedule_id).await?;
    info!("▶️  备份计划已启用");
    info!("   {}", format_schedule_line(&schedule));
    Ok(())
}

pub async fn deactivate_schedule(app: &CliApp, schedule_id: &str) -> Result<()> {
    app.orchestrator.deactivate(schedule_id).await?;
    info!("⏸️  备份计划 {} 已停用", schedule_id);
    Ok(())
}

pub async fn delete_schedule(app: &CliApp, schedule_id: &str) -> Result<()> {
    app.orchestrator.delete_schedule(schedule_id).await?;
    info!("🗑️  备份计划 {} 已删除，已有备份保留", schedule_id);
    Ok(())
}
