use crate::agent::{Agent, OutputMode};
use crate::error::{ClientError, Result};
use pbsq_core::config::QueueConfig;
use pbsq_core::constants::keys;
use pbsq_core::model::{JobIdentity, Params, TaskId};
use pbsq_core::pattern::OutputPattern;
use pbsq_core::template::render;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Task,
    Workflow,
}

/// What a batch system has to offer: render scripts, submit, probe and cancel.
pub trait QueueBackend: Send + Sync {
    fn queue_name(&self) -> &str;
    fn config(&self) -> &QueueConfig;
    fn agent(&self) -> &Arc<dyn Agent>;
    fn render_script(&self, kind: ScriptKind, params: &Params) -> Result<String>;
    fn render_submit(&self, params: &Params) -> Result<String>;
    fn extract_job_id(&self, output: &str) -> Result<JobIdentity>;
    fn probe_status(&self, identity: &JobIdentity, task: &TaskId) -> Result<String>;
    fn kill(&self, identity: &JobIdentity, task: &TaskId) -> Result<String>;
}

/// Shell-command driven backend for PBS, Slurm, LSF and friends.
pub struct PbsBackend {
    queue: String,
    config: QueueConfig,
    pattern: OutputPattern,
    agent: Arc<dyn Agent>,
}

impl PbsBackend {
    /// Backend for submitting tasks. Fails fast on incomplete queue settings.
    pub fn for_tasks(queue: &str, config: QueueConfig, agent: Arc<dyn Agent>) -> Result<Self> {
        config.validate_for_tasks(queue)?;
        Self::build(queue, config, agent)
    }

    pub fn for_workflows(queue: &str, config: QueueConfig, agent: Arc<dyn Agent>) -> Result<Self> {
        config.validate_for_workflows(queue)?;
        Self::build(queue, config, agent)
    }

    fn build(queue: &str, config: QueueConfig, agent: Arc<dyn Agent>) -> Result<Self> {
        let pattern = OutputPattern::compile(config.submit_cmd_output())?;
        Ok(Self {
            queue: queue.to_string(),
            config,
            pattern,
            agent,
        })
    }

    fn render_named(&self, what: &str, template: &str, params: &Params) -> Result<String> {
        render(template, params).map_err(|source| ClientError::Template {
            context: format!("{} of queue {}", what, self.queue),
            source,
        })
    }

    fn identity_params(identity: &JobIdentity, task: &TaskId) -> Params {
        let mut params = identity.to_params();
        params.insert(keys::TASK.into(), Value::from(task.to_string()));
        params
    }
}

impl QueueBackend for PbsBackend {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    fn render_script(&self, kind: ScriptKind, params: &Params) -> Result<String> {
        let (what, template) = match kind {
            ScriptKind::Task => ("task_template", self.config.task_template(&self.queue)?),
            ScriptKind::Workflow => (
                "workflow_template",
                self.config.workflow_template(&self.queue)?,
            ),
        };
        self.render_named(what, template, params)
    }

    fn render_submit(&self, params: &Params) -> Result<String> {
        let template = self.config.submit_cmd(&self.queue)?;
        self.render_named("submit_cmd", template, params)
    }

    fn extract_job_id(&self, output: &str) -> Result<JobIdentity> {
        self.pattern
            .extract(output)
            .and_then(JobIdentity::new)
            .ok_or_else(|| ClientError::JobIdExtraction {
                output: output.trim().to_string(),
                pattern: self.pattern.as_str().to_string(),
            })
    }

    fn probe_status(&self, identity: &JobIdentity, task: &TaskId) -> Result<String> {
        let mut params = Self::identity_params(identity, task);
        params.insert(keys::VERBOSITY.into(), Value::from(1));
        let command = self.render_named("status_cmd", self.config.status_cmd(&self.queue)?, &params)?;
        self.agent.check_output(&command, OutputMode::MergeStderr)
    }

    fn kill(&self, identity: &JobIdentity, task: &TaskId) -> Result<String> {
        let params = Self::identity_params(identity, task);
        let command = self.render_named("kill_cmd", self.config.kill_cmd(&self.queue)?, &params)?;
        self.agent.check_output(&command, OutputMode::MergeStderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::JobDir;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAgent {
        commands: Mutex<Vec<String>>,
    }

    impl Agent for RecordingAgent {
        fn name(&self) -> &str {
            "recording"
        }

        fn send_job_file(&self, _path: &Path, _dir: JobDir, _scope: Option<&str>) -> Result<()> {
            Ok(())
        }

        fn check_output(&self, command: &str, _mode: OutputMode) -> Result<String> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok("ok\n".into())
        }
    }

    fn queue() -> QueueConfig {
        QueueConfig {
            task_template: Some("#!/bin/bash\n{command}\n".into()),
            submit_cmd: Some("qsub {job_file}".into()),
            status_cmd: Some("qstat -v {verbosity} {job_id}".into()),
            kill_cmd: Some("qdel {job_id} # {task}".into()),
            submit_cmd_output: Some("Job <{job_id}> submitted".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_for_tasks_rejects_pattern_without_job_id() {
        let mut config = queue();
        config.submit_cmd_output = Some("{id}".into());
        let result = PbsBackend::for_tasks("q", config, Arc::new(RecordingAgent::default()));
        assert!(matches!(
            result,
            Err(ClientError::Config(
                pbsq_core::errors::ConfigError::MissingJobIdPattern(_)
            ))
        ));
    }

    #[test]
    fn test_extract_job_id_errors_on_no_match() {
        let backend =
            PbsBackend::for_tasks("q", queue(), Arc::new(RecordingAgent::default())).unwrap();
        assert_eq!(
            backend.extract_job_id("Job <12345> submitted\n").unwrap().job_id(),
            "12345"
        );
        assert!(matches!(
            backend.extract_job_id("qsub: queue is full"),
            Err(ClientError::JobIdExtraction { .. })
        ));
    }

    #[test]
    fn test_probe_and_kill_render_identity_fields() {
        let agent = Arc::new(RecordingAgent::default());
        let backend = PbsBackend::for_tasks("q", queue(), agent.clone()).unwrap();
        let identity = backend.extract_job_id("Job <77> submitted").unwrap();
        let task = TaskId("t1".into());

        backend.probe_status(&identity, &task).unwrap();
        backend.kill(&identity, &task).unwrap();

        let commands = agent.commands.lock().unwrap();
        assert_eq!(commands[0], "qstat -v 1 77");
        assert_eq!(commands[1], "qdel 77 # t1");
    }
}
