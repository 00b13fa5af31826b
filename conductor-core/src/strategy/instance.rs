//! 虚拟机实例的参考备份策略
//!
//! 备份时为系统卷和数据卷各打一个快照；恢复时把快照提升为新卷，
//! 再用恢复出的规格和原有标签创建新实例。配额检查通过注入的
//! [`QuotaProbe`] 完成，核心本身从不查询配额。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

use super::{Deserialized, RestorePlan, Strategy, into_strategy_error};
use crate::models::{Metadata, NewScopeSpec, ScopeRef, UserInput, ValidationError};
use crate::{ConductorError, Result};

pub const KIND: &str = "instance";

/// 允许备份的实例状态
const STABLE_STATES: [&str; 2] = ["online", "offline"];

/// 元数据键
mod keys {
    pub const NAME: &str = "name";
    pub const PROJECT_ID: &str = "project_id";
    pub const FLAVOR_NAME: &str = "flavor_name";
    pub const CORES: &str = "cores";
    pub const RAM_MB: &str = "ram_mb";
    pub const IMAGE_NAME: &str = "image_name";
    pub const KEY_NAME: &str = "key_name";
    pub const USER_DATA: &str = "user_data";
    pub const TAGS: &str = "tags";
    pub const SYSTEM_VOLUME_ID: &str = "system_volume_id";
    pub const SYSTEM_VOLUME_SIZE: &str = "system_volume_size";
    pub const DATA_VOLUME_ID: &str = "data_volume_id";
    pub const DATA_VOLUME_SIZE: &str = "data_volume_size";
    pub const SYSTEM_SNAPSHOT_ID: &str = "system_snapshot_id";
    pub const DATA_SNAPSHOT_ID: &str = "data_snapshot_id";
    pub const SYSTEM_SNAPSHOT_SIZE: &str = "system_snapshot_size";
    pub const DATA_SNAPSHOT_SIZE: &str = "data_snapshot_size";
    pub const SNAPSHOT_IDS: &str = "snapshot_ids";

    /// 用户恢复输入
    pub const INPUT_NAME: &str = "name";
    pub const INPUT_FLAVOR: &str = "flavor";
}

/// 实例规格
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub name: String,
    pub cores: u64,
    pub ram_mb: u64,
}

/// 云后端返回的实例描述，卷大小单位为 MB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub state: String,
    pub flavor: Flavor,
    pub image_name: Option<String>,
    pub system_volume_id: String,
    pub system_volume_size: u64,
    pub data_volume_id: String,
    pub data_volume_size: u64,
    pub key_name: Option<String>,
    pub user_data: Option<String>,
    pub tags: Vec<String>,
}

/// 用恢复出的卷启动实例的请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub instance_id: String,
    pub project_id: String,
    pub flavor: Flavor,
    pub system_volume_id: String,
    pub data_volume_id: String,
    pub tags: Vec<String>,
}

/// 云后端调用
#[async_trait]
pub trait InstanceBackend: Send + Sync {
    async fn describe(&self, instance_id: &str) -> Result<InstanceInfo>;

    /// 返回与 `volume_ids` 一一对应的快照 ID
    async fn create_snapshots(
        &self,
        project_id: &str,
        volume_ids: &[String],
        prefix: &str,
    ) -> Result<Vec<String>>;

    async fn delete_snapshots(&self, project_id: &str, snapshot_ids: &[String]) -> Result<()>;

    /// 返回与 `snapshot_ids` 一一对应的新卷 ID
    async fn promote_snapshots(
        &self,
        project_id: &str,
        snapshot_ids: &[String],
        prefix: &str,
    ) -> Result<Vec<String>>;

    async fn provision(&self, request: &ProvisionRequest) -> Result<()>;

    async fn find_flavor(&self, name: &str) -> Result<Option<Flavor>>;
}

/// 单项配额；`limit` 为空表示不限
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub usage: u64,
    pub limit: Option<u64>,
}

impl QuotaUsage {
    pub fn new(usage: u64, limit: u64) -> Self {
        Self {
            usage,
            limit: Some(limit),
        }
    }

    pub fn unlimited(usage: u64) -> Self {
        Self { usage, limit: None }
    }

    pub fn admits(&self, delta: u64) -> bool {
        match self.limit {
            Some(limit) => self.usage.saturating_add(delta) <= limit,
            None => true,
        }
    }
}

/// 项目的实时配额
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectQuota {
    pub cores: QuotaUsage,
    pub ram_mb: QuotaUsage,
    pub storage_mb: QuotaUsage,
    pub instances: QuotaUsage,
}

#[async_trait]
pub trait QuotaProbe: Send + Sync {
    async fn project_quota(&self, project_id: &str) -> Result<ProjectQuota>;
}

/// 新资源需要占用的配额
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceDemand {
    pub cores: u64,
    pub ram_mb: u64,
    pub storage_mb: u64,
    pub instances: u64,
}

/// 每一项超限的配额对应一条校验错误
pub fn check_quota(demand: &ResourceDemand, quota: &ProjectQuota) -> Vec<ValidationError> {
    [
        ("cores", demand.cores, quota.cores),
        ("ram", demand.ram_mb, quota.ram_mb),
        ("storage", demand.storage_mb, quota.storage_mb),
        ("instances", demand.instances, quota.instances),
    ]
    .into_iter()
    .filter(|(_, delta, usage)| !usage.admits(*delta))
    .map(|(field, delta, usage)| {
        ValidationError::quota_exceeded(
            field,
            format!(
                "配额不足: 需要 {delta}，已用 {}，上限 {}",
                usage.usage,
                usage.limit.unwrap_or_default()
            ),
        )
    })
    .collect()
}

pub struct InstanceStrategy {
    backend: Arc<dyn InstanceBackend>,
    quotas: Arc<dyn QuotaProbe>,
}

impl InstanceStrategy {
    pub fn new(backend: Arc<dyn InstanceBackend>, quotas: Arc<dyn QuotaProbe>) -> Self {
        Self { backend, quotas }
    }

    async fn describe(&self, scope: &ScopeRef) -> Result<InstanceInfo> {
        self.backend
            .describe(&scope.id)
            .await
            .map_err(into_strategy_error)
    }

    async fn quota(&self, project_id: &str) -> Result<ProjectQuota> {
        self.quotas
            .project_quota(project_id)
            .await
            .map_err(into_strategy_error)
    }
}

fn describe_metadata(info: &InstanceInfo) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(keys::NAME.into(), json!(info.name));
    metadata.insert(keys::PROJECT_ID.into(), json!(info.project_id));
    metadata.insert(keys::FLAVOR_NAME.into(), json!(info.flavor.name));
    metadata.insert(keys::CORES.into(), json!(info.flavor.cores));
    metadata.insert(keys::RAM_MB.into(), json!(info.flavor.ram_mb));
    metadata.insert(keys::IMAGE_NAME.into(), json!(info.image_name));
    metadata.insert(keys::KEY_NAME.into(), json!(info.key_name));
    metadata.insert(keys::USER_DATA.into(), json!(info.user_data));
    metadata.insert(keys::TAGS.into(), json!(info.tags));
    metadata.insert(keys::SYSTEM_VOLUME_ID.into(), json!(info.system_volume_id));
    metadata.insert(keys::SYSTEM_VOLUME_SIZE.into(), json!(info.system_volume_size));
    metadata.insert(keys::DATA_VOLUME_ID.into(), json!(info.data_volume_id));
    metadata.insert(keys::DATA_VOLUME_SIZE.into(), json!(info.data_volume_size));
    metadata
}

fn get_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}

fn get_u64(metadata: &Metadata, key: &str) -> Option<u64> {
    metadata.get(key).and_then(Value::as_u64)
}

fn get_tags(metadata: &Metadata) -> Vec<String> {
    metadata
        .get(keys::TAGS)
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn flavor_from_metadata(metadata: &Metadata) -> Option<Flavor> {
    Some(Flavor {
        name: get_str(metadata, keys::FLAVOR_NAME)?.to_string(),
        cores: get_u64(metadata, keys::CORES)?,
        ram_mb: get_u64(metadata, keys::RAM_MB)?,
    })
}

#[async_trait]
impl Strategy for InstanceStrategy {
    fn kind(&self) -> &str {
        KIND
    }

    async fn check_scope(&self, scope: &ScopeRef) -> Result<()> {
        let info = self.describe(scope).await?;
        if !STABLE_STATES.contains(&info.state.as_str()) {
            return Err(ConductorError::strategy(format!(
                "实例 {} 处于不稳定状态 {}，无法备份",
                info.id, info.state
            )));
        }
        Ok(())
    }

    async fn backup(&self, scope: &ScopeRef) -> Result<Metadata> {
        let info = self.describe(scope).await?;

        let storage = info.system_volume_size + info.data_volume_size;
        let quota = self.quota(&info.project_id).await?;
        if !quota.storage_mb.admits(storage) {
            return Err(ConductorError::strategy(format!(
                "实例 {} 没有足够的存储配额进行备份",
                info.id
            )));
        }

        let volume_ids = vec![info.system_volume_id.clone(), info.data_volume_id.clone()];
        let snapshots = self
            .backend
            .create_snapshots(
                &info.project_id,
                &volume_ids,
                &format!("Instance {} backup: ", info.id),
            )
            .await
            .map_err(into_strategy_error)?;

        let [system_snapshot, data_snapshot] = snapshots.as_slice() else {
            return Err(ConductorError::strategy(format!(
                "期望 2 个快照，后端返回了 {} 个",
                snapshots.len()
            )));
        };

        let mut metadata = describe_metadata(&info);
        metadata.insert(keys::SYSTEM_SNAPSHOT_ID.into(), json!(system_snapshot));
        metadata.insert(keys::DATA_SNAPSHOT_ID.into(), json!(data_snapshot));
        metadata.insert(keys::SYSTEM_SNAPSHOT_SIZE.into(), json!(info.system_volume_size));
        metadata.insert(keys::DATA_SNAPSHOT_SIZE.into(), json!(info.data_volume_size));
        metadata.insert(keys::SNAPSHOT_IDS.into(), json!(snapshots));

        info!(instance_id = %info.id, "实例快照已创建");
        Ok(metadata)
    }

    async fn restore(
        &self,
        new_scope_id: &str,
        input: &UserInput,
        snapshot_ids: &[String],
    ) -> Result<()> {
        let project_id = get_str(input, keys::PROJECT_ID)
            .ok_or_else(|| ConductorError::strategy("恢复参数缺少 project_id"))?;
        let flavor_name = get_str(input, keys::FLAVOR_NAME)
            .ok_or_else(|| ConductorError::strategy("恢复参数缺少 flavor_name"))?;

        let flavor = self
            .backend
            .find_flavor(flavor_name)
            .await
            .map_err(into_strategy_error)?
            .ok_or_else(|| ConductorError::strategy(format!("规格不存在: {flavor_name}")))?;

        let volumes = self
            .backend
            .promote_snapshots(project_id, snapshot_ids, "Restored volume")
            .await
            .map_err(into_strategy_error)?;

        let [system_volume_id, data_volume_id] = volumes.as_slice() else {
            return Err(ConductorError::strategy(format!(
                "期望 2 个恢复卷，后端返回了 {} 个",
                volumes.len()
            )));
        };

        let request = ProvisionRequest {
            instance_id: new_scope_id.to_string(),
            project_id: project_id.to_string(),
            flavor,
            system_volume_id: system_volume_id.clone(),
            data_volume_id: data_volume_id.clone(),
            tags: get_tags(input),
        };
        self.backend
            .provision(&request)
            .await
            .map_err(into_strategy_error)?;

        info!(instance_id = %new_scope_id, "实例已从备份恢复");
        Ok(())
    }

    async fn delete(&self, scope: &ScopeRef, metadata: &Metadata) -> Result<()> {
        let (Some(project_id), Some(system_snapshot), Some(data_snapshot)) = (
            get_str(metadata, keys::PROJECT_ID),
            get_str(metadata, keys::SYSTEM_SNAPSHOT_ID),
            get_str(metadata, keys::DATA_SNAPSHOT_ID),
        ) else {
            return Err(ConductorError::strategy(format!(
                "实例 {} 的备份元数据缺少快照信息",
                scope.id
            )));
        };

        let snapshot_ids = vec![system_snapshot.to_string(), data_snapshot.to_string()];
        self.backend
            .delete_snapshots(project_id, &snapshot_ids)
            .await
            .map_err(into_strategy_error)?;

        debug!(instance_id = %scope.id, "实例快照已删除");
        Ok(())
    }

    async fn serialize(&self, scope: &ScopeRef) -> Result<Metadata> {
        let info = self.describe(scope).await?;
        Ok(describe_metadata(&info))
    }

    async fn deserialize(&self, metadata: &Metadata, input: &UserInput) -> Result<Deserialized> {
        let mut params = metadata.clone();

        // 用户提供的名称覆盖元数据
        if let Some(name) = input.get(keys::INPUT_NAME).filter(|v| !v.is_null()) {
            params.insert(keys::NAME.into(), name.clone());
        }

        // 新卷大小与快照大小一致
        let (Some(system_size), Some(data_size)) = (
            get_u64(metadata, keys::SYSTEM_SNAPSHOT_SIZE),
            get_u64(metadata, keys::DATA_SNAPSHOT_SIZE),
        ) else {
            return Ok(Deserialized::Invalid(vec![ValidationError::detail(
                "元数据缺少 system_snapshot_size 或 data_snapshot_size",
            )]));
        };
        params.insert(keys::SYSTEM_VOLUME_SIZE.into(), json!(system_size));
        params.insert(keys::DATA_VOLUME_SIZE.into(), json!(data_size));

        let mut errors = Vec::new();

        let name_is_valid = get_str(&params, keys::NAME).is_some_and(|n| !n.trim().is_empty());
        if !name_is_valid {
            errors.push(ValidationError::invalid(keys::NAME, "名称不能为空"));
        }

        let project_id = get_str(&params, keys::PROJECT_ID).map(str::to_string);
        if project_id.is_none() {
            errors.push(ValidationError::detail("元数据缺少 project_id"));
        }

        let flavor = match input.get(keys::INPUT_FLAVOR).filter(|v| !v.is_null()) {
            Some(Value::String(requested)) => {
                let found = self
                    .backend
                    .find_flavor(requested)
                    .await
                    .map_err(into_strategy_error)?;
                if found.is_none() {
                    errors.push(ValidationError::invalid(
                        "flavor",
                        format!("规格不存在: {requested}"),
                    ));
                }
                found
            }
            Some(_) => {
                errors.push(ValidationError::invalid("flavor", "规格必须是名称字符串"));
                None
            }
            None => {
                let found = flavor_from_metadata(&params);
                if found.is_none() {
                    errors.push(ValidationError::detail("元数据缺少规格信息"));
                }
                found
            }
        };

        let (Some(project_id), Some(flavor), true) = (project_id, flavor, errors.is_empty()) else {
            return Ok(Deserialized::Invalid(errors));
        };

        params.insert(keys::FLAVOR_NAME.into(), json!(flavor.name));
        params.insert(keys::CORES.into(), json!(flavor.cores));
        params.insert(keys::RAM_MB.into(), json!(flavor.ram_mb));

        let quota = self.quota(&project_id).await?;
        let demand = ResourceDemand {
            cores: flavor.cores,
            ram_mb: flavor.ram_mb,
            storage_mb: system_size + data_size,
            instances: 1,
        };
        let quota_errors = check_quota(&demand, &quota);
        if !quota_errors.is_empty() {
            return Ok(Deserialized::Invalid(quota_errors));
        }

        let (Some(system_snapshot), Some(data_snapshot)) = (
            get_str(metadata, keys::SYSTEM_SNAPSHOT_ID),
            get_str(metadata, keys::DATA_SNAPSHOT_ID),
        ) else {
            return Ok(Deserialized::Invalid(vec![ValidationError::detail(
                "元数据缺少 system_snapshot_id 或 data_snapshot_id",
            )]));
        };
        let snapshot_ids = vec![system_snapshot.to_string(), data_snapshot.to_string()];

        // 新实例的卷由快照恢复，不沿用旧卷与快照字段
        for key in [
            keys::SYSTEM_VOLUME_ID,
            keys::DATA_VOLUME_ID,
            keys::SYSTEM_SNAPSHOT_ID,
            keys::DATA_SNAPSHOT_ID,
            keys::SYSTEM_SNAPSHOT_SIZE,
            keys::DATA_SNAPSHOT_SIZE,
            keys::SNAPSHOT_IDS,
        ] {
            params.remove(key);
        }

        let mut restore_input = UserInput::new();
        restore_input.insert(keys::PROJECT_ID.into(), json!(project_id));
        restore_input.insert(keys::FLAVOR_NAME.into(), json!(flavor.name));
        restore_input.insert(keys::TAGS.into(), json!(get_tags(metadata)));

        Ok(Deserialized::Plan(RestorePlan {
            spec: NewScopeSpec {
                kind: KIND.to_string(),
                attributes: params,
            },
            restore_input,
            snapshot_ids,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeInstanceBackend, FakeQuotaProbe, sample_instance};

    fn roomy_quota() -> ProjectQuota {
        ProjectQuota {
            cores: QuotaUsage::new(0, 100),
            ram_mb: QuotaUsage::new(0, 100_000),
            storage_mb: QuotaUsage::new(0, 1_000_000),
            instances: QuotaUsage::new(0, 10),
        }
    }

    fn strategy_with(quota: ProjectQuota) -> (InstanceStrategy, Arc<FakeInstanceBackend>) {
        let backend = Arc::new(FakeInstanceBackend::new());
        backend.add_instance(sample_instance("inst-1"));
        let quotas = Arc::new(FakeQuotaProbe::new());
        quotas.set("proj-1", quota);
        (InstanceStrategy::new(backend.clone(), quotas), backend)
    }

    fn scope() -> ScopeRef {
        ScopeRef::new(KIND, "inst-1")
    }

    #[tokio::test]
    async fn test_backup_records_snapshots() {
        let (strategy, backend) = strategy_with(roomy_quota());

        let metadata = strategy.backup(&scope()).await.unwrap();

        assert_eq!(get_str(&metadata, keys::SYSTEM_SNAPSHOT_ID), Some("snap-1"));
        assert_eq!(get_str(&metadata, keys::DATA_SNAPSHOT_ID), Some("snap-2"));
        assert_eq!(get_u64(&metadata, keys::SYSTEM_SNAPSHOT_SIZE), Some(10240));
        assert_eq!(get_u64(&metadata, keys::DATA_SNAPSHOT_SIZE), Some(20480));
        assert_eq!(metadata[keys::SNAPSHOT_IDS], json!(["snap-1", "snap-2"]));
        assert_eq!(backend.snapshots().len(), 2);
    }

    #[tokio::test]
    async fn test_backup_refused_without_storage() {
        let mut quota = roomy_quota();
        quota.storage_mb = QuotaUsage::new(990_000, 1_000_000);
        let (strategy, backend) = strategy_with(quota);

        let err = strategy.backup(&scope()).await.unwrap_err();
        assert!(matches!(err, ConductorError::StrategyExecution(_)));
        assert!(backend.snapshots().is_empty());
    }

    #[tokio::test]
    async fn test_check_scope_rejects_unstable_instance() {
        let (strategy, backend) = strategy_with(roomy_quota());
        assert!(strategy.check_scope(&scope()).await.is_ok());

        let mut busy = sample_instance("inst-2");
        busy.state = "resizing".to_string();
        backend.add_instance(busy);
        let err = strategy
            .check_scope(&ScopeRef::new(KIND, "inst-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::StrategyExecution(_)));
    }

    #[tokio::test]
    async fn test_deserialize_overlays_user_input() {
        let (strategy, backend) = strategy_with(roomy_quota());
        backend.add_flavor(Flavor {
            name: "large".to_string(),
            cores: 4,
            ram_mb: 8192,
        });
        let metadata = strategy.backup(&scope()).await.unwrap();

        let mut input = UserInput::new();
        input.insert("name".into(), json!("restored"));
        input.insert("flavor".into(), json!("large"));

        let Deserialized::Plan(plan) = strategy.deserialize(&metadata, &input).await.unwrap()
        else {
            panic!("应得到恢复计划");
        };

        assert_eq!(plan.spec.kind, KIND);
        assert_eq!(plan.spec.attributes[keys::NAME], json!("restored"));
        assert_eq!(plan.spec.attributes[keys::FLAVOR_NAME], json!("large"));
        assert_eq!(plan.spec.attributes[keys::CORES], json!(4));
        assert_eq!(plan.spec.attributes[keys::SYSTEM_VOLUME_SIZE], json!(10240));
        assert!(!plan.spec.attributes.contains_key(keys::SYSTEM_SNAPSHOT_ID));
        assert_eq!(plan.snapshot_ids, vec!["snap-1", "snap-2"]);
        assert_eq!(plan.restore_input[keys::FLAVOR_NAME], json!("large"));
        assert_eq!(plan.restore_input[keys::TAGS], json!(["web"]));
    }

    #[tokio::test]
    async fn test_deserialize_reports_ram_quota() {
        let mut quota = roomy_quota();
        quota.ram_mb = QuotaUsage::new(8000, 8000);
        let (strategy, _) = strategy_with(roomy_quota());
        let metadata = strategy.backup(&scope()).await.unwrap();

        let (strategy, _) = strategy_with(quota);
        let Deserialized::Invalid(errors) = strategy
            .deserialize(&metadata, &UserInput::new())
            .await
            .unwrap()
        else {
            panic!("配额不足应返回校验错误");
        };

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "ram");
        assert!(errors[0].is_quota());
    }

    #[tokio::test]
    async fn test_serialize_then_deserialize_matches_quota_check() {
        // 源实例满足配额时，恢复计划也满足；反之亦然
        let (strategy, _) = strategy_with(roomy_quota());
        let mut metadata = strategy.serialize(&scope()).await.unwrap();
        metadata.insert(keys::SYSTEM_SNAPSHOT_SIZE.into(), json!(10240));
        metadata.insert(keys::DATA_SNAPSHOT_SIZE.into(), json!(20480));
        metadata.insert(keys::SYSTEM_SNAPSHOT_ID.into(), json!("s1"));
        metadata.insert(keys::DATA_SNAPSHOT_ID.into(), json!("s2"));

        let source = sample_instance("inst-1");
        let demand = ResourceDemand {
            cores: source.flavor.cores,
            ram_mb: source.flavor.ram_mb,
            storage_mb: source.system_volume_size + source.data_volume_size,
            instances: 1,
        };

        let mut tight = roomy_quota();
        tight.cores = QuotaUsage::new(99, 100);

        for quota in [roomy_quota(), tight] {
            let (strategy, _) = strategy_with(quota);
            let source_ok = check_quota(&demand, &quota).is_empty();
            let result = strategy
                .deserialize(&metadata, &UserInput::new())
                .await
                .unwrap();
            assert_eq!(matches!(result, Deserialized::Plan(_)), source_ok);
        }
    }

    #[tokio::test]
    async fn test_deserialize_missing_sizes() {
        let (strategy, _) = strategy_with(roomy_quota());
        let metadata = strategy.serialize(&scope()).await.unwrap();

        let Deserialized::Invalid(errors) = strategy
            .deserialize(&metadata, &UserInput::new())
            .await
            .unwrap()
        else {
            panic!("缺少快照大小应返回校验错误");
        };
        assert_eq!(errors[0].field, "detail");
    }

    #[tokio::test]
    async fn test_deserialize_unknown_flavor() {
        let (strategy, _) = strategy_with(roomy_quota());
        let metadata = strategy.backup(&scope()).await.unwrap();

        let mut input = UserInput::new();
        input.insert("flavor".into(), json!("galactic"));
        let result = strategy.deserialize(&metadata, &input).await.unwrap();
        let Deserialized::Invalid(errors) = result else {
            panic!("未知规格应返回校验错误");
        };
        assert_eq!(errors[0].field, "flavor");
    }

    #[tokio::test]
    async fn test_restore_promotes_and_provisions_with_tags() {
        let (strategy, backend) = strategy_with(roomy_quota());
        let metadata = strategy.backup(&scope()).await.unwrap();
        let Deserialized::Plan(plan) = strategy
            .deserialize(&metadata, &UserInput::new())
            .await
            .unwrap()
        else {
            panic!("应得到恢复计划");
        };

        strategy
            .restore("inst-9", &plan.restore_input, &plan.snapshot_ids)
            .await
            .unwrap();

        let provisioned = backend.provisioned();
        assert_eq!(provisioned.len(), 1);
        assert_eq!(provisioned[0].instance_id, "inst-9");
        assert_eq!(provisioned[0].tags, vec!["web"]);
        assert_eq!(provisioned[0].flavor.name, "small");
        assert_eq!(provisioned[0].system_volume_id, "vol-from-snap-1");
    }

    #[tokio::test]
    async fn test_delete_removes_both_snapshots() {
        let (strategy, backend) = strategy_with(roomy_quota());
        let metadata = strategy.backup(&scope()).await.unwrap();

        strategy.delete(&scope(), &metadata).await.unwrap();
        assert!(backend.snapshots().is_empty());

        let err = strategy
            .delete(&scope(), &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::StrategyExecution(_)));
    }

    #[test]
    fn test_unlimited_quota_admits_anything() {
        assert!(QuotaUsage::unlimited(u64::MAX).admits(1));
        assert!(QuotaUsage::new(10, 20).admits(10));
        assert!(!QuotaUsage::new(10, 20).admits(11));
    }
}
