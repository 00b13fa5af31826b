use crate::constants::{config, db, deadlines, scheduler};
use crate::cron::parse_timezone;
use crate::error::{ConductorError, Result};
use crate::orchestrator::Deadlines;
use crate::strategy::CommandStrategyConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub deadlines: DeadlinesConfig,
    #[serde(default)]
    pub strategies: Vec<CommandStrategyConfig>,
}

/// 数据库相关配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: String,
}

/// 调度相关配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    /// 新建计划未指定时区时使用
    #[serde(default)]
    pub default_timezone: Option<String>,
}

/// 策略调用截止时间（秒）
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeadlinesConfig {
    pub backup_secs: u64,
    pub restore_secs: u64,
    pub delete_secs: u64,
}

#[derive(Serialize)]
struct StrategiesSection<'a> {
    strategies: &'a [CommandStrategyConfig],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: db::DEFAULT_DB_PATH.to_string(),
            },
            scheduler: SchedulerConfig {
                tick_interval_secs: scheduler::DEFAULT_TICK_INTERVAL_SECS,
                default_timezone: None,
            },
            deadlines: DeadlinesConfig {
                backup_secs: deadlines::DEFAULT_BACKUP_SECS,
                restore_secs: deadlines::DEFAULT_RESTORE_SECS,
                delete_secs: deadlines::DEFAULT_DELETE_SECS,
            },
            strategies: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 在当前目录查找并加载配置文件
    pub fn find_and_load_config() -> Result<Self> {
        Self::find_and_load_config_in(Path::new("."))
    }

    /// 按优先级查找：config.toml -> conductor.toml -> .conductor.toml
    /// 找不到时返回 `ConfigNotFound`，默认配置由 `init` 命令写入
    pub fn find_and_load_config_in(dir: &Path) -> Result<Self> {
        let path = Self::find_config_file(dir).ok_or(ConductorError::ConfigNotFound)?;
        tracing::info!("找到配置文件: {}", path.display());
        Self::load_from_file(&path)
    }

    /// 返回目录中第一个存在的候选配置文件
    pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
        config::CONFIG_FILE_CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_with_comments()?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> Result<String> {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        let timezone_line = match &self.scheduler.default_timezone {
            Some(tz) => format!("default_timezone = \"{tz}\""),
            None => "# default_timezone = \"Europe/Tallinn\"".to_string(),
        };

        let mut content = TEMPLATE
            .replace("{database_path}", &self.database.path)
            .replace(
                "{tick_interval_secs}",
                &self.scheduler.tick_interval_secs.to_string(),
            )
            .replace("{default_timezone_line}", &timezone_line)
            .replace("{backup_secs}", &self.deadlines.backup_secs.to_string())
            .replace("{restore_secs}", &self.deadlines.restore_secs.to_string())
            .replace("{delete_secs}", &self.deadlines.delete_secs.to_string());

        if !self.strategies.is_empty() {
            content.push('\n');
            content.push_str(&toml::to_string(&StrategiesSection {
                strategies: &self.strategies,
            })?);
        }

        Ok(content)
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_interval_secs == 0 {
            return Err(ConductorError::custom("scheduler.tick_interval_secs 必须大于 0"));
        }

        for (name, secs) in [
            ("deadlines.backup_secs", self.deadlines.backup_secs),
            ("deadlines.restore_secs", self.deadlines.restore_secs),
            ("deadlines.delete_secs", self.deadlines.delete_secs),
        ] {
            if secs == 0 || secs > deadlines::MAX_DEADLINE_SECS {
                return Err(ConductorError::custom(format!(
                    "{name} 必须在 1 到 {} 之间",
                    deadlines::MAX_DEADLINE_SECS
                )));
            }
        }

        if let Some(tz) = &self.scheduler.default_timezone {
            parse_timezone(tz).map_err(|reason| {
                ConductorError::custom(format!("scheduler.default_timezone 无效: {reason}"))
            })?;
        }

        let mut kinds = HashSet::new();
        for strategy in &self.strategies {
            if strategy.kind.is_empty() || strategy.program.is_empty() {
                return Err(ConductorError::custom("策略配置缺少 kind 或 program"));
            }
            if !kinds.insert(strategy.kind.as_str()) {
                return Err(ConductorError::custom(format!(
                    "资源类型 {} 配置了多个策略",
                    strategy.kind
                )));
            }
        }

        Ok(())
    }

    /// 获取数据库文件路径
    pub fn get_database_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs)
    }

    pub fn deadlines(&self) -> Deadlines {
        Deadlines::from_secs(
            self.deadlines.backup_secs,
            self.deadlines.restore_secs,
            self.deadlines.delete_secs,
        )
    }

    /// 默认时区: 配置项 > `TZ` 环境变量 > UTC
    pub fn default_timezone(&self) -> String {
        if let Some(tz) = &self.scheduler.default_timezone {
            return tz.clone();
        }

        match std::env::var("TZ") {
            Ok(tz) if parse_timezone(&tz).is_ok() => tz,
            _ => scheduler::FALLBACK_TIMEZONE.to_string(),
        }
    }
}
