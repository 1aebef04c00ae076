use crate::error::ExecutorError;
use crate::topology::is_local_node;
use async_trait::async_trait;
use pbsq_core::constants::{keys, suffixes};
use pbsq_core::model::{Params, RuntimeParams, TaskId};
use pbsq_core::template::shell_quote;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;

/// Everything a worker needs to run one sub-task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubTaskRequest {
    pub master_id: TaskId,
    pub sub_id: TaskId,
    pub params: Params,
    /// `_runtime` of the master plus the sub-task's own runtime entry.
    pub runtime: Params,
    pub sig_content: Params,
    pub config: Params,
    pub quiet: bool,
    #[serde(default)]
    pub node: Option<String>,
}

impl SubTaskRequest {
    fn runtime_slice(&self, scope: &str) -> Option<RuntimeParams> {
        let value = self.runtime.get(scope)?.clone();
        serde_json::from_value(value)
            .map_err(|e| tracing::debug!("Ignoring malformed runtime entry {}: {}", scope, e))
            .ok()
    }

    /// The master's `_runtime` with the sub-task's own entry laid over it.
    pub fn effective_runtime(&self) -> RuntimeParams {
        let mut runtime = self.runtime_slice(keys::RUNTIME).unwrap_or_default();
        if let Some(own) = self.runtime_slice(self.sub_id.as_str()) {
            runtime.overlay(&own);
        }
        runtime
    }

    pub fn workdir(&self) -> Option<PathBuf> {
        self.effective_runtime().workdir
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubTaskResult {
    pub sub_id: TaskId,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: Option<PathBuf>,
    #[serde(default)]
    pub stderr: Option<PathBuf>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl SubTaskResult {
    pub fn failed(sub_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            sub_id,
            exit_code: 1,
            stdout: None,
            stderr: None,
            outputs: Vec::new(),
            error: Some(error.into()),
            node: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

/// Runs one sub-task to completion. Failures are reported in the result, not raised.
#[async_trait]
pub trait SubTaskRunner: Send + Sync {
    async fn run(&self, request: SubTaskRequest) -> SubTaskResult;
}

/// Runs the sub-task's `command` parameter through `sh -c`, over `ssh`
/// when the assigned node is remote.
pub struct ShellSubTaskRunner {
    tasks_dir: PathBuf,
}

impl ShellSubTaskRunner {
    pub fn new(tasks_dir: PathBuf) -> Self {
        Self { tasks_dir }
    }

    fn build_command(&self, request: &SubTaskRequest, script: &str) -> TokioCommand {
        let mut cmd = match request.node.as_deref() {
            Some(node) if !is_local_node(node) => {
                let remote = match request.workdir() {
                    Some(dir) => format!("cd {} && {}", shell_quote(&dir.to_string_lossy()), script),
                    None => script.to_string(),
                };
                let mut cmd = TokioCommand::new("ssh");
                cmd.arg(node).arg(remote);
                cmd
            }
            _ => {
                let mut cmd = TokioCommand::new("sh");
                cmd.arg("-c").arg(script);
                if let Some(dir) = request.workdir() {
                    cmd.current_dir(dir);
                }
                cmd
            }
        };
        cmd.kill_on_drop(true);
        cmd
    }

    async fn try_run(&self, request: &SubTaskRequest) -> Result<SubTaskResult, ExecutorError> {
        let script = request
            .params
            .get(keys::COMMAND)
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutorError::SubTask {
                sub_id: request.sub_id.to_string(),
                message: "no command parameter".to_string(),
            })?;

        tokio::fs::create_dir_all(&self.tasks_dir).await?;
        let stdout_path = self
            .tasks_dir
            .join(format!("{}.{}", request.sub_id, suffixes::STDOUT));
        let stderr_path = self
            .tasks_dir
            .join(format!("{}.{}", request.sub_id, suffixes::STDERR));
        let stdout = std::fs::File::create(&stdout_path)?;
        let stderr = std::fs::File::create(&stderr_path)?;

        let mut cmd = self.build_command(request, script);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        if !request.quiet {
            tracing::info!("{} ``running`` {}", request.sub_id, script);
        }
        tracing::debug!("[CMD] {:?}", cmd.as_std());

        let status = cmd.status().await?;
        let outputs = request
            .params
            .get("outputs")
            .map(|v| match v {
                Value::Array(items) => items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect(),
                Value::String(s) => vec![s.clone()],
                _ => Vec::new(),
            })
            .unwrap_or_default();

        Ok(SubTaskResult {
            sub_id: request.sub_id.clone(),
            exit_code: status.code().unwrap_or(-1),
            stdout: Some(stdout_path),
            stderr: Some(stderr_path),
            outputs,
            error: None,
            node: request.node.clone(),
        })
    }
}

#[async_trait]
impl SubTaskRunner for ShellSubTaskRunner {
    async fn run(&self, request: SubTaskRequest) -> SubTaskResult {
        match self.try_run(&request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Sub-task {} could not be run: {}", request.sub_id, e);
                let mut result = SubTaskResult::failed(request.sub_id.clone(), e.to_string());
                result.node = request.node;
                result
            }
        }
    }
}
