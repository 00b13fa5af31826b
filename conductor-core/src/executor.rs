//! 异步执行器
//!
//! 每次提交先在存储中写入一条 `Pending` 任务，再在后台运行策略调用。
//! `ResultId` 就是任务 ID，保存在备份行上，进程重启后仍可轮询。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{
    Metadata, OperationKind, ResultId, ScopeRef, TaskOutcome, TaskRecord, TaskStatus, UserInput,
};
use crate::store::Store;
use crate::strategy::{Strategy, StrategyRegistry};
use crate::{ConductorError, Result};

/// 提交给执行器的策略操作
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Backup,
    Restore {
        new_scope_id: String,
        input: UserInput,
        snapshot_ids: Vec<String>,
    },
    Delete {
        metadata: Metadata,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Backup => OperationKind::Backup,
            Operation::Restore { .. } => OperationKind::Restore,
            Operation::Delete { .. } => OperationKind::Delete,
        }
    }
}

/// 轮询结果
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Pending,
    Done { metadata: Option<Metadata> },
    Failed { kind: String, message: String },
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// 提交工作并立即返回句柄；执行失败只能通过 `poll` 观察到
    async fn submit(
        &self,
        op: Operation,
        scope: &ScopeRef,
        deadline: DateTime<Utc>,
    ) -> Result<ResultId>;

    /// 幂等，可重复调用
    async fn poll(&self, id: &str) -> Result<PollState>;
}

/// 基于 tokio 任务的执行器
pub struct TaskExecutor {
    registry: Arc<StrategyRegistry>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<DashMap<ResultId, JoinHandle<()>>>,
    tracker: TaskTracker,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
            in_flight: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// 当前进程中仍在运行的工作单元数
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// 等待所有已提交的工作结束
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// 把超过截止时间的 `Pending` 任务标记为失败
    async fn expire(&self, task: &TaskRecord, now: DateTime<Utc>) -> Result<PollState> {
        if let Some((_, handle)) = self.in_flight.remove(&task.id) {
            handle.abort();
        }

        let error = ConductorError::DeadlineExceeded(format!(
            "任务 {} 超过截止时间 {}",
            task.id, task.deadline_at
        ));
        if self
            .store
            .finish_task(&task.id, &TaskOutcome::failed(&error), now)
            .await?
        {
            warn!(result_id = %task.id, operation = task.operation.as_str(), "任务超过截止时间");
        }

        self.settled(&task.id).await
    }

    /// 把没有执行者的 `Pending` 任务标记为中断
    async fn interrupt(&self, id: &str, reason: String, now: DateTime<Utc>) -> Result<PollState> {
        let error = ConductorError::strategy(reason);
        if self
            .store
            .finish_task(id, &TaskOutcome::failed(&error), now)
            .await?
        {
            warn!(result_id = %id, "任务没有执行者，标记为中断: {error}");
        }
        self.settled(id).await
    }

    /// 重新读取任务，返回已经落盘的结果
    async fn settled(&self, id: &str) -> Result<PollState> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| ConductorError::not_found("执行任务", id))?;
        Ok(poll_state(&task))
    }
}

fn poll_state(task: &TaskRecord) -> PollState {
    match task.status {
        TaskStatus::Pending => PollState::Pending,
        TaskStatus::Done => PollState::Done {
            metadata: task.metadata.clone(),
        },
        TaskStatus::Failed => PollState::Failed {
            kind: task
                .error_kind
                .clone()
                .unwrap_or_else(|| "strategy_execution".to_string()),
            message: task.error.clone().unwrap_or_default(),
        },
    }
}

async fn run_operation(
    strategy: &dyn Strategy,
    scope: &ScopeRef,
    op: Operation,
) -> Result<Option<Metadata>> {
    match op {
        Operation::Backup => strategy.backup(scope).await.map(Some),
        Operation::Restore {
            new_scope_id,
            input,
            snapshot_ids,
        } => strategy
            .restore(&new_scope_id, &input, &snapshot_ids)
            .await
            .map(|_| None),
        Operation::Delete { metadata } => strategy.delete(scope, &metadata).await.map(|_| None),
    }
}

#[async_trait]
impl Executor for TaskExecutor {
    async fn submit(
        &self,
        op: Operation,
        scope: &ScopeRef,
        deadline: DateTime<Utc>,
    ) -> Result<ResultId> {
        let strategy = self.registry.get(&scope.kind)?;
        let id = Uuid::new_v4().to_string();
        let now = self.clock.now();

        let task = TaskRecord {
            id: id.clone(),
            operation: op.kind(),
            scope: scope.clone(),
            status: TaskStatus::Pending,
            metadata: None,
            error_kind: None,
            error: None,
            deadline_at: deadline,
            submitted_at: now,
            finished_at: None,
        };
        self.store.create_task(&task).await?;

        let budget = (deadline - now).to_std().unwrap_or_default();
        let store = self.store.clone();
        let clock = self.clock.clone();
        let in_flight = self.in_flight.clone();
        let task_id = id.clone();
        let scope = scope.clone();
        let operation = op.kind();

        // 登记完成之前不开始执行
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let handle = self.tracker.spawn(async move {
            let _ = registered_rx.await;

            let outcome =
                match tokio::time::timeout(budget, run_operation(strategy.as_ref(), &scope, op))
                    .await
                {
                    Ok(Ok(metadata)) => TaskOutcome::Done(metadata),
                    Ok(Err(e)) => TaskOutcome::failed(&e),
                    Err(_) => TaskOutcome::failed(&ConductorError::DeadlineExceeded(format!(
                        "{} {} 超过截止时间",
                        operation.as_str(),
                        scope
                    ))),
                };

            match &outcome {
                TaskOutcome::Done(_) => {
                    debug!(result_id = %task_id, operation = operation.as_str(), "任务完成")
                }
                TaskOutcome::Failed { kind, message } => {
                    warn!(result_id = %task_id, operation = operation.as_str(), kind = %kind, "任务失败: {message}")
                }
            }

            // 先写结果再注销，轮询看到无主任务时结果一定已经落盘
            if let Err(e) = store.finish_task(&task_id, &outcome, clock.now()).await {
                error!(result_id = %task_id, "保存任务结果失败: {e}");
            }
            in_flight.remove(&task_id);
        });

        self.in_flight.insert(id.clone(), handle);
        let _ = registered_tx.send(());

        info!(result_id = %id, operation = task.operation.as_str(), scope = %task.scope, "任务已提交");
        Ok(id)
    }

    async fn poll(&self, id: &str) -> Result<PollState> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| ConductorError::not_found("执行任务", id))?;

        if task.status != TaskStatus::Pending {
            return Ok(poll_state(&task));
        }

        let now = self.clock.now();
        if now >= task.deadline_at {
            return self.expire(&task, now).await;
        }

        let running = self.in_flight.get(id).map(|handle| !handle.is_finished());
        match running {
            Some(true) => Ok(PollState::Pending),
            Some(false) => {
                // 工作单元已结束但没有写入结果: 策略调用 panic
                self.in_flight.remove(id);
                let state = self.settled(id).await?;
                if state != PollState::Pending {
                    return Ok(state);
                }
                self.interrupt(id, format!("工作单元异常退出，任务 {id} 被中断"), now)
                    .await
            }
            // 没有进程内的执行者: 进程重启前提交的任务
            None => {
                self.interrupt(id, format!("执行器已重启，任务 {id} 被中断"), now)
                    .await
            }
        }
    }
}
