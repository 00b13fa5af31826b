//! 备份策略
//!
//! 核心并不知道快照是什么，只在策略调用之间传递不透明的元数据和快照 ID。
//! 每种资源类型注册一个 [`Strategy`]，这是唯一的扩展点。

pub mod command;
pub mod instance;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Metadata, NewScopeSpec, ScopeRef, UserInput, ValidationError};
use crate::{ConductorError, Result};

pub use command::{CommandStrategy, CommandStrategyConfig};
pub use instance::{
    InstanceBackend, InstanceInfo, InstanceStrategy, ProjectQuota, ProvisionRequest, QuotaProbe,
    QuotaUsage, ResourceDemand,
};

/// 一种资源类型的备份策略
#[async_trait]
pub trait Strategy: Send + Sync {
    /// 资源类型，作为注册表键
    fn kind(&self) -> &str;

    /// 为 true 时备份在创建请求中同步完成，不经过执行器
    fn is_synchronous(&self) -> bool {
        false
    }

    /// 资源不处于可备份的稳定状态时返回错误
    async fn check_scope(&self, _scope: &ScopeRef) -> Result<()> {
        Ok(())
    }

    async fn backup(&self, scope: &ScopeRef) -> Result<Metadata>;

    async fn restore(
        &self,
        new_scope_id: &str,
        input: &UserInput,
        snapshot_ids: &[String],
    ) -> Result<()>;

    async fn delete(&self, scope: &ScopeRef, metadata: &Metadata) -> Result<()>;

    /// 描述资源所需的元数据
    async fn serialize(&self, scope: &ScopeRef) -> Result<Metadata>;

    /// 从备份元数据和用户输入构造新资源描述，配额不足以校验错误返回
    async fn deserialize(&self, metadata: &Metadata, input: &UserInput) -> Result<Deserialized>;
}

/// 反序列化成功后得到的恢复计划
#[derive(Debug, Clone, PartialEq)]
pub struct RestorePlan {
    pub spec: NewScopeSpec,
    /// 传给 [`Strategy::restore`] 的参数
    pub restore_input: UserInput,
    pub snapshot_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Deserialized {
    Plan(RestorePlan),
    Invalid(Vec<ValidationError>),
}

/// 根据资源描述创建新资源记录，由调用方负责持久化
#[async_trait]
pub trait ScopeProvisioner: Send + Sync {
    async fn provision(&self, spec: &NewScopeSpec) -> Result<ScopeRef>;
}

/// 资源类型到策略的映射
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册策略，同类型的旧策略被替换
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies
            .insert(strategy.kind().to_string(), strategy);
    }

    pub fn with(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.register(strategy);
        self
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .get(kind)
            .cloned()
            .ok_or_else(|| ConductorError::UnknownKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.strategies.contains_key(kind)
    }

    /// 已注册的资源类型（排序后）
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.strategies.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// 后端错误统一包装为策略执行错误
pub(crate) fn into_strategy_error(error: ConductorError) -> ConductorError {
    match error {
        ConductorError::StrategyExecution(_) => error,
        other => ConductorError::strategy(other.to_string()),
    }
}
