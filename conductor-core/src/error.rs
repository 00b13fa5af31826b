use crate::models::ValidationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConductorError>;

#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("无效的cron表达式 '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("状态不允许该操作: 当前状态 {current}, 期望 {expected}")]
    InvalidState { current: String, expected: String },

    #[error("未注册的资源类型: {0}")]
    UnknownKind(String),

    #[error("{entity} 不存在: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("操作冲突: {0}")]
    Conflict(String),

    #[error("参数校验失败: {}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("备份策略执行失败: {0}")]
    StrategyExecution(String),

    #[error("操作超过截止时间: {0}")]
    DeadlineExceeded(String),

    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("配置序列化错误: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("DuckDB数据库错误: {0}")]
    DuckDb(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("配置文件未找到")]
    ConfigNotFound,

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for ConductorError {
    fn from(err: duckdb::Error) -> Self {
        ConductorError::DuckDb(err.to_string())
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConductorError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn strategy(msg: impl Into<String>) -> Self {
        Self::StrategyExecution(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_cron(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCron {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_state(current: impl ToString, expected: impl Into<String>) -> Self {
        Self::InvalidState {
            current: current.to_string(),
            expected: expected.into(),
        }
    }

    /// 错误的稳定分类名，用于事件上下文和任务记录
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCron { .. } => "invalid_cron",
            Self::InvalidState { .. } => "invalid_state",
            Self::UnknownKind(_) => "unknown_kind",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
            Self::StrategyExecution(_) => "strategy_execution",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::Config(_) | Self::ConfigSerialize(_) | Self::ConfigNotFound => "config",
            Self::DuckDb(_) => "storage",
            Self::Io(_) => "io",
            Self::Serde(_) => "serde",
            Self::Custom(_) => "custom",
        }
    }

    /// 存储层错误会中断当前轮次，但不会终止进程
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::DuckDb(_))
    }
}
