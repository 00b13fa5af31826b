//! 单元测试共用的假实现

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::events::{Event, EventSink};
use crate::executor::{Executor, Operation, PollState};
use crate::models::{Metadata, NewScopeSpec, ResultId, ScopeRef, UserInput};
use crate::strategy::instance::Flavor;
use crate::strategy::{
    Deserialized, InstanceBackend, InstanceInfo, ProjectQuota, ProvisionRequest, QuotaProbe,
    RestorePlan, ScopeProvisioner, Strategy,
};
use crate::{ConductorError, Result};

#[derive(Default, Clone)]
struct Behaviour {
    synchronous: bool,
    hang: bool,
    panic_on_backup: bool,
    refuse_scope: Option<String>,
    backup_error: Option<String>,
    restore_error: Option<String>,
    delete_error: Option<String>,
    deserialize: Option<Deserialized>,
}

/// 可编排行为的策略
pub struct FakeStrategy {
    kind: String,
    behaviour: Mutex<Behaviour>,
    calls: Mutex<Vec<String>>,
}

impl FakeStrategy {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            behaviour: Mutex::new(Behaviour::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn synchronous(&self) {
        self.behaviour.lock().unwrap().synchronous = true;
    }

    pub fn hang(&self) {
        self.behaviour.lock().unwrap().hang = true;
    }

    pub fn panic_on_backup(&self) {
        self.behaviour.lock().unwrap().panic_on_backup = true;
    }

    pub fn refuse_scope(&self, reason: &str) {
        self.behaviour.lock().unwrap().refuse_scope = Some(reason.to_string());
    }

    pub fn fail_backup(&self, reason: &str) {
        self.behaviour.lock().unwrap().backup_error = Some(reason.to_string());
    }

    pub fn fail_restore(&self, reason: &str) {
        self.behaviour.lock().unwrap().restore_error = Some(reason.to_string());
    }

    pub fn fail_delete(&self, reason: &str) {
        self.behaviour.lock().unwrap().delete_error = Some(reason.to_string());
    }

    pub fn deserialize_with(&self, result: Deserialized) {
        self.behaviour.lock().unwrap().deserialize = Some(result);
    }

    /// 按调用顺序记录的操作名
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == operation)
            .count()
    }

    async fn enter(&self, operation: &str) -> Behaviour {
        self.calls.lock().unwrap().push(operation.to_string());
        let behaviour = self.behaviour.lock().unwrap().clone();
        if behaviour.hang && operation != "check" && operation != "deserialize" {
            std::future::pending::<()>().await;
        }
        behaviour
    }
}

#[async_trait]
impl Strategy for FakeStrategy {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn is_synchronous(&self) -> bool {
        self.behaviour.lock().unwrap().synchronous
    }

    async fn check_scope(&self, _scope: &ScopeRef) -> Result<()> {
        match self.enter("check").await.refuse_scope {
            Some(reason) => Err(ConductorError::strategy(reason)),
            None => Ok(()),
        }
    }

    async fn backup(&self, scope: &ScopeRef) -> Result<Metadata> {
        let behaviour = self.enter("backup").await;
        if behaviour.panic_on_backup {
            panic!("backend crashed while snapshotting {scope}");
        }
        if let Some(reason) = behaviour.backup_error {
            return Err(ConductorError::strategy(reason));
        }
        let mut metadata = Metadata::new();
        metadata.insert(
            "snapshot_ids".to_string(),
            json!([format!("sys-{}", scope.id), format!("data-{}", scope.id)]),
        );
        Ok(metadata)
    }

    async fn restore(
        &self,
        _new_scope_id: &str,
        _input: &UserInput,
        _snapshot_ids: &[String],
    ) -> Result<()> {
        match self.enter("restore").await.restore_error {
            Some(reason) => Err(ConductorError::strategy(reason)),
            None => Ok(()),
        }
    }

    async fn delete(&self, _scope: &ScopeRef, _metadata: &Metadata) -> Result<()> {
        match self.enter("delete").await.delete_error {
            Some(reason) => Err(ConductorError::strategy(reason)),
            None => Ok(()),
        }
    }

    async fn serialize(&self, scope: &ScopeRef) -> Result<Metadata> {
        self.enter("serialize").await;
        let mut metadata = Metadata::new();
        metadata.insert("id".to_string(), json!(scope.id));
        Ok(metadata)
    }

    async fn deserialize(&self, metadata: &Metadata, input: &UserInput) -> Result<Deserialized> {
        if let Some(result) = self.enter("deserialize").await.deserialize {
            return Ok(result);
        }
        let snapshot_ids = metadata
            .get("snapshot_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Deserialized::Plan(RestorePlan {
            spec: NewScopeSpec {
                kind: self.kind.clone(),
                attributes: metadata.clone(),
            },
            restore_input: input.clone(),
            snapshot_ids,
        }))
    }
}

/// 记录所有事件
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.types().iter().filter(|t| **t == event_type).count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// 提交时只记录，轮询结果由测试设定
#[derive(Default)]
pub struct ScriptedExecutor {
    submitted: Mutex<Vec<(ResultId, Operation, ScopeRef, DateTime<Utc>)>>,
    states: Mutex<HashMap<ResultId, PollState>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: &str, state: PollState) {
        self.states.lock().unwrap().insert(id.to_string(), state);
    }

    pub fn submitted(&self) -> Vec<(ResultId, Operation, ScopeRef, DateTime<Utc>)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn submit(
        &self,
        op: Operation,
        scope: &ScopeRef,
        deadline: DateTime<Utc>,
    ) -> Result<ResultId> {
        let mut submitted = self.submitted.lock().unwrap();
        let id = format!("r-{}", submitted.len() + 1);
        submitted.push((id.clone(), op, scope.clone(), deadline));
        Ok(id)
    }

    async fn poll(&self, id: &str) -> Result<PollState> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or(PollState::Pending))
    }
}

/// 记录创建请求的资源创建器
#[derive(Default)]
pub struct FakeProvisioner {
    specs: Mutex<Vec<NewScopeSpec>>,
    hang: bool,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 永不返回的资源创建器
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn specs(&self) -> Vec<NewScopeSpec> {
        self.specs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScopeProvisioner for FakeProvisioner {
    async fn provision(&self, spec: &NewScopeSpec) -> Result<ScopeRef> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        let mut specs = self.specs.lock().unwrap();
        specs.push(spec.clone());
        Ok(ScopeRef::new(spec.kind.clone(), format!("new-{}", specs.len())))
    }
}

pub fn small_flavor() -> Flavor {
    Flavor {
        name: "small".to_string(),
        cores: 2,
        ram_mb: 2048,
    }
}

pub fn sample_instance(id: &str) -> InstanceInfo {
    InstanceInfo {
        id: id.to_string(),
        name: "web-1".to_string(),
        project_id: "proj-1".to_string(),
        state: "online".to_string(),
        flavor: small_flavor(),
        image_name: Some("ubuntu-22.04".to_string()),
        system_volume_id: format!("vol-sys-{id}"),
        system_volume_size: 10240,
        data_volume_id: format!("vol-data-{id}"),
        data_volume_size: 20480,
        key_name: Some("ops".to_string()),
        user_data: None,
        tags: vec!["web".to_string()],
    }
}

#[derive(Default)]
struct CloudState {
    instances: HashMap<String, InstanceInfo>,
    flavors: HashMap<String, Flavor>,
    snapshots: Vec<String>,
    next_snapshot: u32,
    provisioned: Vec<ProvisionRequest>,
}

/// 内存中的云后端
pub struct FakeInstanceBackend {
    state: Mutex<CloudState>,
}

impl FakeInstanceBackend {
    pub fn new() -> Self {
        let mut state = CloudState::default();
        state.flavors.insert("small".to_string(), small_flavor());
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn add_instance(&self, info: InstanceInfo) {
        self.state
            .lock()
            .unwrap()
            .instances
            .insert(info.id.clone(), info);
    }

    pub fn add_flavor(&self, flavor: Flavor) {
        self.state
            .lock()
            .unwrap()
            .flavors
            .insert(flavor.name.clone(), flavor);
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.state.lock().unwrap().snapshots.clone()
    }

    pub fn provisioned(&self) -> Vec<ProvisionRequest> {
        self.state.lock().unwrap().provisioned.clone()
    }
}

#[async_trait]
impl InstanceBackend for FakeInstanceBackend {
    async fn describe(&self, instance_id: &str) -> Result<InstanceInfo> {
        self.state
            .lock()
            .unwrap()
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| ConductorError::not_found("实例", instance_id))
    }

    async fn create_snapshots(
        &self,
        _project_id: &str,
        volume_ids: &[String],
        _prefix: &str,
    ) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let mut created = Vec::new();
        for _ in volume_ids {
            state.next_snapshot += 1;
            let id = format!("snap-{}", state.next_snapshot);
            state.snapshots.push(id.clone());
            created.push(id);
        }
        Ok(created)
    }

    async fn delete_snapshots(&self, _project_id: &str, snapshot_ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.snapshots.retain(|s| !snapshot_ids.contains(s));
        Ok(())
    }

    async fn promote_snapshots(
        &self,
        _project_id: &str,
        snapshot_ids: &[String],
        _prefix: &str,
    ) -> Result<Vec<String>> {
        Ok(snapshot_ids
            .iter()
            .map(|s| format!("vol-from-{s}"))
            .collect())
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<()> {
        self.state.lock().unwrap().provisioned.push(request.clone());
        Ok(())
    }

    async fn find_flavor(&self, name: &str) -> Result<Option<Flavor>> {
        Ok(self.state.lock().unwrap().flavors.get(name).cloned())
    }
}

/// 按项目返回固定配额，未设置的项目不限额
#[derive(Default)]
pub struct FakeQuotaProbe {
    quotas: Mutex<HashMap<String, ProjectQuota>>,
}

impl FakeQuotaProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, project_id: &str, quota: ProjectQuota) {
        self.quotas
            .lock()
            .unwrap()
            .insert(project_id.to_string(), quota);
    }
}

#[async_trait]
impl QuotaProbe for FakeQuotaProbe {
    async fn project_quota(&self, project_id: &str) -> Result<ProjectQuota> {
        Ok(self
            .quotas
            .lock()
            .unwrap()
            .get(project_id)
            .copied()
            .unwrap_or_default())
    }
}
