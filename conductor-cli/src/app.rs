use anyhow::Context;
use conductor_core::{
    clock::SystemClock,
    config::AppConfig,
    db::DuckDbManager,
    error::{ConductorError, Result},
    executor::TaskExecutor,
    orchestrator::Orchestrator,
    scheduler::Scheduler,
    store::Store,
    strategy::{CommandStrategy, StrategyRegistry},
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cli::{BackupCommand, Commands, ScheduleCommand};
use crate::commands;

#[derive(Clone)]
pub struct CliApp {
    pub config: AppConfig,
    pub database: DuckDbManager,
    pub executor: Arc<TaskExecutor>,
    pub orchestrator: Arc<Orchestrator>,
    provisioners: HashMap<String, Arc<CommandStrategy>>,
}

impl CliApp {
    /// 在当前目录自动查找配置文件并初始化CLI应用
    pub async fn new_with_auto_config() -> anyhow::Result<Self> {
        let config = AppConfig::find_and_load_config().context("无法加载配置文件")?;
        Self::open(config).await
    }

    /// 从指定配置文件初始化CLI应用
    pub async fn new_with_config(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            return Err(ConductorError::ConfigNotFound.into());
        }
        let config = AppConfig::load_from_file(config_path)
            .with_context(|| format!("无法加载配置文件 {}", config_path.display()))?;
        info!("加载配置文件: {}", config_path.display());
        Self::open(config).await
    }

    async fn open(config: AppConfig) -> anyhow::Result<Self> {
        let db_path = config.get_database_path();
        let database = DuckDbManager::new(&db_path)
            .await
            .with_context(|| format!("无法打开数据库 {}", db_path.display()))?;
        Ok(Self::from_parts(config, database)?)
    }

    /// 使用已打开的数据库组装应用
    pub fn from_parts(config: AppConfig, database: DuckDbManager) -> Result<Self> {
        let mut registry = StrategyRegistry::new();
        let mut provisioners = HashMap::new();
        for strategy_config in &config.strategies {
            let strategy = Arc::new(CommandStrategy::new(strategy_config.clone()));
            registry.register(strategy.clone());
            provisioners.insert(strategy_config.kind.clone(), strategy);
            debug!(kind = %strategy_config.kind, program = %strategy_config.program, "注册策略");
        }
        let registry = Arc::new(registry);

        let store: Arc<dyn Store> = Arc::new(database.clone());
        let clock = Arc::new(SystemClock);
        let executor = Arc::new(TaskExecutor::new(
            registry.clone(),
            store.clone(),
            clock.clone(),
        ));

        let orchestrator = Arc::new(
            Orchestrator::new(store, registry, executor.clone())
                .with_clock(clock)
                .with_deadlines(config.deadlines())
                .with_default_timezone(config.default_timezone()),
        );

        Ok(Self {
            config,
            database,
            executor,
            orchestrator,
            provisioners,
        })
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.orchestrator.clone(), self.config.tick_interval())
    }

    /// 恢复时用于创建新资源的策略程序
    pub fn provisioner(&self, kind: &str) -> Result<Arc<CommandStrategy>> {
        self.provisioners
            .get(kind)
            .cloned()
            .ok_or_else(|| ConductorError::UnknownKind(kind.to_string()))
    }

    /// 运行应用命令
    pub async fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::Run => commands::run_scheduler(self).await,
            Commands::FireDue => commands::run_fire_due(self).await,
            Commands::ReapExpired => commands::run_reap_expired(self).await,
            Commands::Poll => commands::run_poll(self).await,
            Commands::Backup(backup_cmd) => self.run_backup_command(backup_cmd).await,
            Commands::Schedule(schedule_cmd) => self.run_schedule_command(schedule_cmd).await,
        }
    }

    /// 运行备份相关命令
    async fn run_backup_command(&mut self, cmd: BackupCommand) -> Result<()> {
        match cmd {
            BackupCommand::Create {
                scope,
                description,
                keep_days,
            } => commands::create_backup(self, scope, description, keep_days).await,
            BackupCommand::List {
                kind,
                scope_id,
                schedule,
                state,
                description,
            } => {
                commands::list_backups(self, kind, scope_id, schedule, state, description).await
            }
            BackupCommand::Show { backup_id } => commands::show_backup(self, &backup_id).await,
            BackupCommand::Restore { backup_id, input } => {
                commands::restore_backup(self, &backup_id, input.as_deref()).await
            }
            BackupCommand::Delete { backup_id } => commands::delete_backup(self, &backup_id).await,
        }
    }

    /// 运行备份计划相关命令
    async fn run_schedule_command(&mut self, cmd: ScheduleCommand) -> Result<()> {
        match cmd {
            ScheduleCommand::Create {
                scope,
                schedule,
                timezone,
                retention_days,
                max_backups,
                inactive,
                description,
            } => {
                let draft = conductor_core::orchestrator::ScheduleDraft {
                    scope: scope.into(),
                    schedule,
                    timezone,
                    retention_days,
                    max_backups,
                    active: !inactive,
                    description,
                };
                commands::create_schedule(self, draft).await
            }
            ScheduleCommand::List {
                active,
                description,
            } => commands::list_schedules(self, active, description).await,
            ScheduleCommand::Show { schedule_id } => {
                commands::show_schedule(self, &schedule_id).await
            }
            ScheduleCommand::Update {
                schedule_id,
                schedule,
                timezone,
                retention_days,
                max_backups,
                description,
            } => {
                let update = conductor_core::orchestrator::ScheduleUpdate {
                    schedule,
                    timezone,
                    retention_days,
                    max_backups,
                    description,
                };
                commands::update_schedule(self, &schedule_id, update).await
            }
            ScheduleCommand::Activate { schedule_id } => {
                commands::activate_schedule(self, &schedule_id).await
            }
            ScheduleCommand::Deactivate { schedule_id } => {
                commands::deactivate_schedule(self, &schedule_id).await
            }
            ScheduleCommand::Delete { schedule_id } => {
                commands::delete_schedule(self, &schedule_id).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::strategy::CommandStrategyConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_config_reported() {
        let dir = TempDir::new().unwrap();
        let Err(err) = CliApp::new_with_config(&dir.path().join("absent.toml")).await else {
            panic!("缺少配置文件时应失败");
        };
        assert!(matches!(
            err.downcast_ref::<ConductorError>(),
            Some(ConductorError::ConfigNotFound)
        ));
    }

    #[tokio::test]
    async fn test_strategies_registered_from_config() {
        let mut config = AppConfig::default();
        config.strategies.push(CommandStrategyConfig {
            kind: "instance".to_string(),
            program: "instance-backup".to_string(),
            args: vec![],
            synchronous: false,
        });
        let database = DuckDbManager::new_memory().await.unwrap();

        let app = CliApp::from_parts(config, database).unwrap();
        assert_eq!(app.orchestrator.registry().kinds(), vec!["instance"]);
        assert!(app.provisioner("instance").is_ok());
        assert!(matches!(
            app.provisioner("volume"),
            Err(ConductorError::UnknownKind(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_config_keeps_cause() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[scheduler]\ntick_interval_secs = \"soon\"").unwrap();

        let Err(err) = CliApp::new_with_config(&config_path).await else {
            panic!("配置错误时应失败");
        };
        assert!(err.to_string().contains("无法加载配置文件"));
        assert!(matches!(
            err.downcast_ref::<ConductorError>(),
            Some(ConductorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_load_from_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.database.path = dir.path().join("data/conductor.db").display().to_string();
        config.save_to_file(&config_path).unwrap();

        let app = CliApp::new_with_config(&config_path).await.unwrap();
        assert!(app.orchestrator.registry().is_empty());
        assert!(dir.path().join("data").exists());
    }
}
