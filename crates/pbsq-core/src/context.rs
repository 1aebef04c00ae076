use crate::config::{Config, QueueConfig};
use crate::constants::{defaults, suffixes};
use crate::errors::ConfigError;
use crate::model::TaskId;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything an operation needs to know about the current invocation.
/// Passed explicitly instead of living in process-wide state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub config: Arc<Config>,
    pub queue: Option<String>,
    pub tasks_dir: PathBuf,
    pub workflows_dir: PathBuf,
    pub verbosity: u8,
    pub sig_mode: String,
    pub run_mode: String,
}

impl ExecutionContext {
    pub fn new(config: Config, queue: Option<String>) -> Result<Self, ConfigError> {
        let tasks_dir = config.expanded_tasks_dir()?;
        let workflows_dir = config.expanded_workflows_dir()?;
        Ok(Self::from_parts(
            Arc::new(config),
            queue,
            tasks_dir,
            workflows_dir,
        ))
    }

    pub fn from_parts(
        config: Arc<Config>,
        queue: Option<String>,
        tasks_dir: PathBuf,
        workflows_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            queue,
            tasks_dir,
            workflows_dir,
            verbosity: defaults::VERBOSITY,
            sig_mode: defaults::SIG_MODE.to_string(),
            run_mode: defaults::RUN_MODE.to_string(),
        }
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_sig_mode(mut self, sig_mode: impl Into<String>) -> Self {
        self.sig_mode = sig_mode.into();
        self
    }

    pub fn with_run_mode(mut self, run_mode: impl Into<String>) -> Self {
        self.run_mode = run_mode.into();
        self
    }

    pub fn is_dryrun(&self) -> bool {
        self.run_mode == defaults::DRYRUN
    }

    pub fn queue_config(&self) -> Result<(String, &QueueConfig), ConfigError> {
        self.config.queue(self.queue.as_deref())
    }

    pub fn task_file(&self, id: &TaskId, suffix: &str) -> PathBuf {
        self.tasks_dir.join(format!("{}.{}", id, suffix))
    }

    pub fn task_spec_path(&self, id: &TaskId) -> PathBuf {
        self.task_file(id, suffixes::TASK)
    }

    pub fn workflow_file(&self, name: &str, suffix: &str) -> PathBuf {
        self.workflows_dir.join(format!("{}.{}", name, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_paths() {
        let ctx = ExecutionContext::from_parts(
            Arc::new(Config::default()),
            Some("cluster".into()),
            "/data/tasks".into(),
            "/data/workflows".into(),
        );
        let id = TaskId("abc".into());
        assert_eq!(ctx.task_spec_path(&id), PathBuf::from("/data/tasks/abc.task"));
        assert_eq!(
            ctx.task_file(&id, suffixes::JOB_ID),
            PathBuf::from("/data/tasks/abc.job_id")
        );
        assert_eq!(
            ctx.workflow_file("wf", suffixes::SCRIPT),
            PathBuf::from("/data/workflows/wf.sh")
        );
    }

    #[test]
    fn test_dryrun_flag() {
        let ctx = ExecutionContext::from_parts(
            Arc::new(Config::default()),
            None,
            "/t".into(),
            "/w".into(),
        );
        assert!(!ctx.is_dryrun());
        assert!(ctx.with_run_mode("dryrun").is_dryrun());
    }
}
