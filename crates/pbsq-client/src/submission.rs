use crate::agent::{JobDir, OutputMode};
use crate::backend::{QueueBackend, ScriptKind};
use crate::error::{ClientError, Result};
use crate::registry::JobRegistry;
use crate::store::TaskStore;
use pbsq_core::constants::{keys, suffixes};
use pbsq_core::context::ExecutionContext;
use pbsq_core::errors::DomainError;
use pbsq_core::model::{JobIdentity, Params, TaskId, TaskSpec, TaskStatus};
use pbsq_core::template::{job_file_path, TaskParameters};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Submitted(JobIdentity),
    DryRun { output: String },
}

fn write_script(path: &Path, script: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(path, script.replace("\r\n", "\n"))?;
    Ok(())
}

/// Shared tail of task and workflow submission: dry run or submit, then
/// extract and record the job identity.
fn submit_script(
    backend: &dyn QueueBackend,
    registry: &JobRegistry,
    dir: JobDir,
    name: &str,
    params: &Params,
    dry_run: bool,
) -> Result<SubmissionOutcome> {
    let agent = backend.agent();
    let job_file = params
        .get(keys::JOB_FILE)
        .and_then(Value::as_str)
        .unwrap_or_default();

    if dry_run {
        let output = agent.check_output(&format!("bash {}", job_file), OutputMode::StdoutOnly)?;
        return Ok(SubmissionOutcome::DryRun { output });
    }

    let command = backend.render_submit(params)?;
    let output = agent.check_output(&command, OutputMode::MergeStderr)?;
    if output.trim().is_empty() {
        return Err(ClientError::NoOutput {
            task: TaskId(name.to_string()),
            command,
        });
    }

    let identity = backend.extract_job_id(&output)?;
    let record = registry.record(name, &identity)?;
    agent.send_job_file(&record, dir, None)?;

    tracing::info!(
        "{} ``submitted`` to {} with job id {}",
        name,
        backend.queue_name(),
        identity.job_id()
    );
    Ok(SubmissionOutcome::Submitted(identity))
}

pub struct TaskSubmitter {
    ctx: ExecutionContext,
    backend: Arc<dyn QueueBackend>,
    registry: JobRegistry,
    store: Arc<dyn TaskStore>,
}

impl TaskSubmitter {
    pub fn new(ctx: ExecutionContext, backend: Arc<dyn QueueBackend>, store: Arc<dyn TaskStore>) -> Self {
        let registry = JobRegistry::new(ctx.tasks_dir.clone());
        Self {
            ctx,
            backend,
            registry,
            store,
        }
    }

    fn load_task(&self, task_id: &TaskId) -> Result<TaskSpec> {
        let path = self.ctx.task_spec_path(task_id);
        if !path.exists() {
            return Err(DomainError::TaskNotFound(task_id.clone()).into());
        }
        Ok(TaskSpec::load(&path)?)
    }

    fn local_job_file(&self, task_id: &TaskId) -> (PathBuf, Option<&str>) {
        let scope = self
            .backend
            .config()
            .queue_scoped_dirs
            .then(|| self.backend.queue_name());
        (
            job_file_path(&self.ctx.tasks_dir, scope, task_id.as_str()),
            scope,
        )
    }

    pub fn submit(&self, task_id: &TaskId) -> Result<SubmissionOutcome> {
        let task = self.load_task(task_id)?;
        let params = TaskParameters::new(
            &self.ctx,
            self.backend.queue_name(),
            self.backend.config(),
            &task,
        );
        let dry_run = params.run_mode() == pbsq_core::constants::defaults::DRYRUN;
        let params = params.into_params();

        let script = self.backend.render_script(ScriptKind::Task, &params)?;
        let (path, scope) = self.local_job_file(task_id);
        write_script(&path, &script)?;
        self.backend
            .agent()
            .send_job_file(&path, JobDir::Tasks, scope)?;

        let outcome = submit_script(
            self.backend.as_ref(),
            &self.registry,
            JobDir::Tasks,
            task_id.as_str(),
            &params,
            dry_run,
        )?;
        if matches!(outcome, SubmissionOutcome::Submitted(_)) {
            self.store.set_status(task_id, TaskStatus::Submitted)?;
        }
        Ok(outcome)
    }

    /// Submits each task on its own. One failure never stops the rest.
    pub fn submit_all(&self, task_ids: &[TaskId]) -> Vec<(TaskId, Result<SubmissionOutcome>)> {
        task_ids
            .iter()
            .map(|id| {
                let result = self.submit(id);
                if let Err(e) = &result {
                    tracing::warn!("Failed to submit task {}: {}", id, e);
                }
                (id.clone(), result)
            })
            .collect()
    }
}

pub struct WorkflowSubmitter {
    ctx: ExecutionContext,
    backend: Arc<dyn QueueBackend>,
    registry: JobRegistry,
}

impl WorkflowSubmitter {
    pub fn new(ctx: ExecutionContext, backend: Arc<dyn QueueBackend>) -> Self {
        let registry = JobRegistry::new(ctx.workflows_dir.clone());
        Self {
            ctx,
            backend,
            registry,
        }
    }

    pub fn submit(&self, job_name: &str, params: &Params) -> Result<SubmissionOutcome> {
        TaskId::parse(job_name)?;

        let mut all = self.backend.config().template_params();
        all.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        all.insert(keys::JOB_NAME.into(), Value::from(job_name));
        all.entry(keys::VERBOSITY.to_string())
            .or_insert_with(|| Value::from(self.ctx.verbosity));
        all.entry(keys::RUN_MODE.to_string())
            .or_insert_with(|| Value::from(self.ctx.run_mode.clone()));
        let job_file = job_file_path(Path::new(&self.ctx.config.workflows_dir), None, job_name);
        all.insert(
            keys::JOB_FILE.into(),
            Value::from(job_file.to_string_lossy().to_string()),
        );

        let script = self.backend.render_script(ScriptKind::Workflow, &all)?;
        let path = self.ctx.workflow_file(job_name, suffixes::SCRIPT);
        write_script(&path, &script)?;
        self.backend
            .agent()
            .send_job_file(&path, JobDir::Workflows, None)?;

        submit_script(
            self.backend.as_ref(),
            &self.registry,
            JobDir::Workflows,
            job_name,
            &all,
            self.ctx.is_dryrun(),
        )
    }
}
