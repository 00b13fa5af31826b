//! 外部命令策略
//!
//! 以 `<program> <args…> <action>` 的形式调用运维配置的程序，
//! 请求通过 stdin 以 JSON 传入，响应从 stdout 读取。
//! 非零退出码视为策略执行失败，stderr 作为失败原因。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Deserialized, RestorePlan, ScopeProvisioner, Strategy};
use crate::models::{Metadata, NewScopeSpec, ScopeRef, UserInput, ValidationError};
use crate::{ConductorError, Result};

/// 配置文件中的 `[[strategies]]` 条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStrategyConfig {
    pub kind: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub synchronous: bool,
}

#[derive(Debug, Clone)]
pub struct CommandStrategy {
    config: CommandStrategyConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeserializeResponse {
    Invalid {
        errors: Vec<ValidationError>,
    },
    Plan {
        spec: NewScopeSpec,
        #[serde(default)]
        restore_input: UserInput,
        #[serde(default)]
        snapshot_ids: Vec<String>,
    },
}

impl CommandStrategy {
    pub fn new(config: CommandStrategyConfig) -> Self {
        Self { config }
    }

    /// 执行一次策略程序调用
    async fn invoke(&self, action: &str, request: Value) -> Result<Value> {
        debug!(kind = %self.config.kind, action, program = %self.config.program, "调用策略程序");

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ConductorError::strategy(format!(
                    "无法启动策略程序 {}: {e}",
                    self.config.program
                ))
            })?;

        // 写入 stdin 与读取输出并发进行，程序可能先输出再读取请求
        let payload = serde_json::to_vec(&request)?;
        let stdin = child.stdin.take();
        let write_request = async move {
            if let Some(mut stdin) = stdin {
                // 程序可以不读取 stdin
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(action, "写入策略程序 stdin 失败: {e}");
                }
            }
        };

        let ((), output) = tokio::join!(write_request, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(kind = %self.config.kind, action, status = %output.status, "策略程序执行失败");
            return Err(ConductorError::strategy(format!(
                "{} {} 失败 ({}): {}",
                self.config.kind,
                action,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(stdout).map_err(|e| {
            ConductorError::strategy(format!("策略程序 {action} 输出不是有效的 JSON: {e}"))
        })
    }

    async fn invoke_for_metadata(&self, action: &str, request: Value) -> Result<Metadata> {
        match self.invoke(action, request).await? {
            Value::Object(metadata) => Ok(metadata),
            Value::Null => Ok(Metadata::new()),
            other => Err(ConductorError::strategy(format!(
                "策略程序 {action} 应返回 JSON 对象，实际为: {other}"
            ))),
        }
    }
}

#[async_trait]
impl Strategy for CommandStrategy {
    fn kind(&self) -> &str {
        &self.config.kind
    }

    fn is_synchronous(&self) -> bool {
        self.config.synchronous
    }

    async fn check_scope(&self, scope: &ScopeRef) -> Result<()> {
        self.invoke("check", json!({ "scope": scope })).await?;
        Ok(())
    }

    async fn backup(&self, scope: &ScopeRef) -> Result<Metadata> {
        self.invoke_for_metadata("backup", json!({ "scope": scope }))
            .await
    }

    async fn restore(
        &self,
        new_scope_id: &str,
        input: &UserInput,
        snapshot_ids: &[String],
    ) -> Result<()> {
        self.invoke(
            "restore",
            json!({
                "new_scope_id": new_scope_id,
                "input": input,
                "snapshot_ids": snapshot_ids,
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, scope: &ScopeRef, metadata: &Metadata) -> Result<()> {
        self.invoke("delete", json!({ "scope": scope, "metadata": metadata }))
            .await?;
        Ok(())
    }

    async fn serialize(&self, scope: &ScopeRef) -> Result<Metadata> {
        self.invoke_for_metadata("serialize", json!({ "scope": scope }))
            .await
    }

    async fn deserialize(&self, metadata: &Metadata, input: &UserInput) -> Result<Deserialized> {
        let response = self
            .invoke(
                "deserialize",
                json!({ "metadata": metadata, "input": input }),
            )
            .await?;

        let response: DeserializeResponse = serde_json::from_value(response).map_err(|e| {
            ConductorError::strategy(format!("无法解析 deserialize 响应: {e}"))
        })?;

        Ok(match response {
            DeserializeResponse::Invalid { errors } => Deserialized::Invalid(errors),
            DeserializeResponse::Plan {
                spec,
                restore_input,
                snapshot_ids,
            } => Deserialized::Plan(RestorePlan {
                spec,
                restore_input,
                snapshot_ids,
            }),
        })
    }
}

#[async_trait]
impl ScopeProvisioner for CommandStrategy {
    async fn provision(&self, spec: &NewScopeSpec) -> Result<ScopeRef> {
        let response = self.invoke("provision", json!({ "spec": spec })).await?;
        serde_json::from_value(response)
            .map_err(|e| ConductorError::strategy(format!("无法解析 provision 响应: {e}")))
    }
}
