use crate::control::{ControlPlane, Coordinator, ResultCollector};
use crate::error::{ExecutorError, Result};
use crate::result::{append_subtask_outputs, CombinedResult, FanOutState, ResultFolder};
use crate::runner::{SubTaskRequest, SubTaskResult, SubTaskRunner};
use crate::topology::{node_names, resolve, WorkerSpec, WorkerTopology, LOCALHOST};
use futures::stream::{self, StreamExt};
use pbsq_core::config::{ExecutorConfig, Transport};
use pbsq_core::constants::{keys, suffixes};
use pbsq_core::context::ExecutionContext;
use pbsq_core::model::{Params, TaskId, TaskSpec};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub transport: Transport,
    pub ready_timeout: Duration,
    pub collect_timeout: Duration,
    pub join_timeout: Duration,
}

impl From<&ExecutorConfig> for ExecutorSettings {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            transport: config.transport,
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
            collect_timeout: Duration::from_secs(config.collect_timeout_secs),
            join_timeout: Duration::from_secs(config.join_timeout_secs),
        }
    }
}

/// Runs the sub-tasks of a master task, either in a local worker pool or
/// through a coordinator, and folds their results into one.
pub struct MasterTaskExecutor {
    ctx: ExecutionContext,
    workers: WorkerSpec,
    topology: WorkerTopology,
    runner: Arc<dyn SubTaskRunner>,
    settings: ExecutorSettings,
}

impl MasterTaskExecutor {
    /// Fails fast on a worker specification that cannot be resolved.
    pub fn new(ctx: ExecutionContext, workers: WorkerSpec, runner: Arc<dyn SubTaskRunner>) -> Result<Self> {
        let topology = resolve(&workers)?;
        let settings = ExecutorSettings::from(&ctx.config.executor);
        Ok(Self {
            ctx,
            workers,
            topology,
            runner,
            settings,
        })
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn topology(&self) -> WorkerTopology {
        self.topology
    }

    fn transition(&self, task: &TaskId, from: FanOutState, to: FanOutState) {
        tracing::debug!("Master task {}: {} -> {}", task, from, to);
    }

    fn config_snapshot(&self) -> Params {
        let mut config = Params::new();
        config.insert(
            "tasks_dir".into(),
            Value::from(self.ctx.tasks_dir.to_string_lossy().to_string()),
        );
        config.insert(keys::VERBOSITY.into(), Value::from(self.ctx.verbosity));
        config.insert(keys::SIG_MODE.into(), Value::from(self.ctx.sig_mode.clone()));
        config.insert(keys::RUN_MODE.into(), Value::from(self.ctx.run_mode.clone()));
        if let Some(queue) = &self.ctx.queue {
            config.insert("queue".into(), Value::from(queue.clone()));
        }
        config
    }

    /// One request per sub-task, in list order.
    pub fn build_requests(&self, task: &TaskSpec) -> Vec<SubTaskRequest> {
        let config = self.config_snapshot();
        let master_runtime = serde_json::to_value(&task.runtime).unwrap_or(Value::Null);
        task.sub_tasks
            .iter()
            .map(|sub| {
                let mut params = sub.params.clone();
                if let Some(common) = &task.common_params {
                    params.extend(common.iter().map(|(k, v)| (k.clone(), v.clone())));
                }

                let mut runtime = Params::new();
                runtime.insert(keys::RUNTIME.into(), master_runtime.clone());
                runtime.insert(
                    sub.id.to_string(),
                    serde_json::to_value(&sub.runtime).unwrap_or(Value::Null),
                );

                let mut sig_content = Params::new();
                sig_content.insert(
                    sub.id.to_string(),
                    task.sig_content
                        .get(sub.id.as_str())
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Default::default())),
                );

                SubTaskRequest {
                    master_id: task.id.clone(),
                    sub_id: sub.id.clone(),
                    params,
                    runtime,
                    sig_content,
                    config: config.clone(),
                    quiet: true,
                    node: None,
                }
            })
            .collect()
    }

    fn master_files(&self, task: &TaskId) -> (PathBuf, PathBuf) {
        (
            self.ctx.task_file(task, suffixes::STDOUT),
            self.ctx.task_file(task, suffixes::STDERR),
        )
    }

    async fn truncate_master_files(out: &Path, err: &Path) {
        for path in [out, err] {
            if path.exists() {
                if let Err(e) = tokio::fs::write(path, b"").await {
                    tracing::warn!("Failed to truncate {}: {}", path.display(), e);
                }
            }
        }
    }

    async fn absorb(folder: &mut ResultFolder, result: SubTaskResult, out: &Path, err: &Path) {
        if let Err(e) = append_subtask_outputs(&result, out, err).await {
            tracing::warn!("Failed to copy result of subtask {}: {}", result.sub_id, e);
        }
        folder.fold(result);
    }

    fn runs_locally(&self, task: &TaskSpec) -> bool {
        matches!(task.trunk_workers, Some(WorkerSpec::Fixed(n)) if n > 1)
            || self.topology.is_single_node()
    }

    /// An explicit topology without a per-node limit runs every sub-task at once.
    /// Only an automatic specification falls back to the CPU count.
    fn local_pool_size(&self, task: &TaskSpec, pending: usize) -> usize {
        match task.trunk_workers {
            Some(WorkerSpec::Fixed(n)) if n > 1 => usize::try_from(n).unwrap_or(1),
            _ => match (self.topology.node_count, self.topology.workers_per_node) {
                (_, Some(workers)) => workers,
                (Some(_), None) => pending,
                (None, None) => num_cpus::get(),
            },
        }
    }

    /// A task's own node list must agree with the executor's; an empty list defers to it.
    fn check_task_workers(&self, task: &TaskSpec) {
        match &task.trunk_workers {
            Some(WorkerSpec::NodeList(list)) if list.is_empty() => {
                tracing::debug!(
                    "Task {} adopts worker specification {}",
                    task.id,
                    self.workers
                );
            }
            Some(WorkerSpec::NodeList(list)) if Some(list.len()) != self.topology.node_count => {
                tracing::warn!(
                    "Task option trunk_workers={} is inconsistent with worker specification {}",
                    WorkerSpec::NodeList(list.clone()),
                    self.workers
                );
            }
            _ => {}
        }
    }

    pub async fn execute(&self, task: &TaskSpec) -> Result<CombinedResult> {
        task.validate()?;
        if task.sub_tasks.is_empty() {
            self.transition(&task.id, FanOutState::Pending, FanOutState::Combined);
            return Ok(CombinedResult::empty(task.id.clone()));
        }

        let (out, err) = self.master_files(&task.id);
        Self::truncate_master_files(&out, &err).await;
        let requests = self.build_requests(task);

        let result = if self.runs_locally(task) {
            self.execute_local(task, requests, &out, &err).await
        } else {
            self.check_task_workers(task);
            self.execute_distributed(task, requests, &out, &err).await
        };
        tracing::info!(
            "Master task {} {} with {} of {} sub-tasks reported, {} failed",
            task.id,
            result.state,
            result.entries.len(),
            task.sub_tasks.len(),
            result.failed.len()
        );
        Ok(result)
    }

    async fn execute_local(
        &self,
        task: &TaskSpec,
        requests: Vec<SubTaskRequest>,
        out: &Path,
        err: &Path,
    ) -> CombinedResult {
        let pool = self.local_pool_size(task, requests.len()).max(1);
        let mut folder = ResultFolder::new(task.sub_tasks.iter().map(|s| s.id.clone()).collect());
        self.transition(&task.id, FanOutState::Pending, FanOutState::Dispatching);
        tracing::debug!("Running {} sub-tasks of {} with {} local workers", requests.len(), task.id, pool);

        let runner = self.runner.clone();
        let results: Vec<SubTaskResult> = stream::iter(requests.into_iter().map(|mut request| {
            let runner = runner.clone();
            request.node = Some(LOCALHOST.to_string());
            async move { runner.run(request).await }
        }))
        .buffered(pool)
        .collect()
        .await;

        self.transition(&task.id, FanOutState::Dispatching, FanOutState::Collecting);
        for result in results {
            Self::absorb(&mut folder, result, out, err).await;
        }
        self.transition(&task.id, FanOutState::Collecting, FanOutState::Combined);
        folder.finish(task.id.clone(), None, None)
    }

    async fn execute_distributed(
        &self,
        task: &TaskSpec,
        requests: Vec<SubTaskRequest>,
        out: &Path,
        err: &Path,
    ) -> CombinedResult {
        let expected = requests.len();
        let mut folder = ResultFolder::new(task.sub_tasks.iter().map(|s| s.id.clone()).collect());
        self.transition(&task.id, FanOutState::Pending, FanOutState::Dispatching);

        let collector = match ResultCollector::bind(self.settings.transport, expected).await {
            Ok(collector) => collector,
            Err(e) => return self.abort(task, folder, FanOutState::Dispatching, e, None),
        };
        let coordinator = Coordinator::new(
            self.topology,
            node_names(&self.workers),
            self.runner.clone(),
            collector.address(),
        );
        let mut plane = match ControlPlane::start(
            coordinator,
            collector,
            expected,
            self.settings.ready_timeout,
            self.settings.join_timeout,
        )
        .await
        {
            Ok(plane) => plane,
            Err(e) => return self.abort(task, folder, FanOutState::Dispatching, e, None),
        };

        let mut state = FanOutState::Dispatching;
        let mut failure: Option<ExecutorError> = None;
        for request in requests {
            if let Err(e) = plane.dispatch(request).await {
                failure = Some(e);
                break;
            }
        }

        if failure.is_none() {
            self.transition(&task.id, state, FanOutState::Collecting);
            state = FanOutState::Collecting;
            let deadline = Instant::now() + self.settings.collect_timeout;
            while folder.received() < expected {
                match plane.collect_until(deadline).await {
                    Ok(result) => Self::absorb(&mut folder, result, out, err).await,
                    Err(ExecutorError::CollectTimeout { .. }) => {
                        failure = Some(ExecutorError::CollectTimeout {
                            received: folder.received(),
                            expected,
                            timeout_secs: self.settings.collect_timeout.as_secs_f64(),
                        });
                        break;
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        let summary = plane.shutdown(failure.is_none()).await;
        match failure {
            Some(e) => self.abort(task, folder, state, e, summary),
            None => {
                self.transition(&task.id, state, FanOutState::Combined);
                folder.finish(task.id.clone(), None, summary)
            }
        }
    }

    fn abort(
        &self,
        task: &TaskSpec,
        folder: ResultFolder,
        from: FanOutState,
        error: ExecutorError,
        summary: Option<crate::control::CoordinatorSummary>,
    ) -> CombinedResult {
        tracing::error!("Master task {} aborted: {}", task.id, error);
        self.transition(&task.id, from, FanOutState::Aborted);
        let mut result = folder.finish(task.id.clone(), Some(error.to_string()), summary);
        result.aborted_in = Some(from);
        result
    }

    /// Runs a task without sub-tasks as a single unit of work.
    pub async fn execute_single(&self, task: &TaskSpec) -> Result<CombinedResult> {
        let mut params = task.params.clone();
        if let Some(common) = &task.common_params {
            params.extend(common.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let mut runtime = Params::new();
        runtime.insert(
            keys::RUNTIME.into(),
            serde_json::to_value(&task.runtime).unwrap_or(Value::Null),
        );
        let request = SubTaskRequest {
            master_id: task.id.clone(),
            sub_id: task.id.clone(),
            params,
            runtime,
            sig_content: Params::new(),
            config: self.config_snapshot(),
            quiet: false,
            node: Some(LOCALHOST.to_string()),
        };
        let mut folder = ResultFolder::new(vec![task.id.clone()]);
        folder.fold(self.runner.run(request).await);
        Ok(folder.finish(task.id.clone(), None, None))
    }
}
