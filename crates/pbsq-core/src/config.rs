use crate::constants::{defaults, dirs};
use crate::errors::ConfigError;
use crate::model::{Params, WorkerSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_files: usize,
    pub max_age_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_age_days: 7,
        }
    }
}

/// How sub-task results travel back to the dispatcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    InProcess,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub workers: Option<WorkerSpec>,
    pub transport: Transport,
    pub ready_timeout_secs: u64,
    pub collect_timeout_secs: u64,
    pub join_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: None,
            transport: Transport::InProcess,
            ready_timeout_secs: 30,
            collect_timeout_secs: 3600,
            join_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueueConfig {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub task_template: Option<String>,
    /// Deprecated spelling of `task_template`.
    #[serde(default)]
    pub job_template: Option<String>,
    #[serde(default)]
    pub workflow_template: Option<String>,
    #[serde(default)]
    pub submit_cmd: Option<String>,
    #[serde(default)]
    pub status_cmd: Option<String>,
    #[serde(default)]
    pub kill_cmd: Option<String>,
    #[serde(default)]
    pub submit_cmd_output: Option<String>,
    #[serde(default)]
    pub queue_scoped_dirs: bool,
    #[serde(flatten)]
    pub extra: Params,
}

fn require<'a>(queue: &str, key: &str, value: &'a Option<String>) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .ok_or_else(|| ConfigError::MissingQueueKey {
            queue: queue.to_string(),
            key: key.to_string(),
        })
}

impl QueueConfig {
    pub fn task_template(&self, queue: &str) -> Result<&str, ConfigError> {
        if let Some(template) = &self.task_template {
            return Ok(template);
        }
        if let Some(template) = &self.job_template {
            tracing::warn!(
                "Option job_template is deprecated and will be removed in a future release. Please use task_template instead."
            );
            return Ok(template);
        }
        Err(ConfigError::MissingQueueKey {
            queue: queue.to_string(),
            key: "task_template".to_string(),
        })
    }

    pub fn workflow_template(&self, queue: &str) -> Result<&str, ConfigError> {
        require(queue, "workflow_template", &self.workflow_template)
    }

    pub fn submit_cmd(&self, queue: &str) -> Result<&str, ConfigError> {
        require(queue, "submit_cmd", &self.submit_cmd)
    }

    pub fn status_cmd(&self, queue: &str) -> Result<&str, ConfigError> {
        require(queue, "status_cmd", &self.status_cmd)
    }

    pub fn kill_cmd(&self, queue: &str) -> Result<&str, ConfigError> {
        require(queue, "kill_cmd", &self.kill_cmd)
    }

    pub fn submit_cmd_output(&self) -> &str {
        self.submit_cmd_output
            .as_deref()
            .unwrap_or(defaults::SUBMIT_CMD_OUTPUT)
    }

    /// Checks everything a task queue needs before anything is rendered.
    pub fn validate_for_tasks(&self, queue: &str) -> Result<(), ConfigError> {
        self.task_template(queue)?;
        self.submit_cmd(queue)?;
        self.status_cmd(queue)?;
        self.kill_cmd(queue)?;
        Ok(())
    }

    pub fn validate_for_workflows(&self, queue: &str) -> Result<(), ConfigError> {
        self.workflow_template(queue)?;
        self.submit_cmd(queue)?;
        Ok(())
    }

    /// Settings visible to templates. Task runtime values are layered on top.
    pub fn template_params(&self) -> Params {
        let mut params = self.extra.clone();
        if let Some(address) = &self.address {
            params.insert("address".into(), serde_json::Value::from(address.clone()));
        }
        params
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub default_queue: Option<String>,
    pub tasks_dir: String,
    pub workflows_dir: String,
    pub queues: BTreeMap<String, QueueConfig>,
    pub executor: ExecutorConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_queue: None,
            tasks_dir: dirs::DEFAULT_TASKS_DIR.to_string(),
            workflows_dir: dirs::DEFAULT_WORKFLOWS_DIR.to_string(),
            queues: BTreeMap::new(),
            executor: ExecutorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn queue(&self, alias: Option<&str>) -> Result<(String, &QueueConfig), ConfigError> {
        let name = alias
            .map(str::to_string)
            .or_else(|| self.default_queue.clone())
            .ok_or(ConfigError::NoQueueSelected)?;
        let queue = self
            .queues
            .get(&name)
            .ok_or_else(|| ConfigError::QueueNotFound(name.clone()))?;
        Ok((name, queue))
    }

    pub fn expanded_tasks_dir(&self) -> Result<PathBuf, ConfigError> {
        expand_path(&self.tasks_dir)
    }

    pub fn expanded_workflows_dir(&self) -> Result<PathBuf, ConfigError> {
        expand_path(&self.workflows_dir)
    }
}

pub fn expand_path(raw: &str) -> Result<PathBuf, ConfigError> {
    let expanded = shellexpand::full(raw)
        .map_err(|e| ConfigError::General(format!("Cannot expand path '{}': {}", raw, e)))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pbsq");
    let config_home = xdg_dirs
        .get_config_home()
        .ok_or(ConfigError::HomeDirectoryNotFound)?;
    Ok(config_home.join("config.toml"))
}

/// Loads the configuration file. A missing default file yields the defaults,
/// an explicitly requested one must exist.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path()?, false),
    };

    if !path.exists() {
        if explicit {
            return Err(ConfigError::PathIo {
                path,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "configuration file does not exist",
                ),
            });
        }
        tracing::debug!("No config file at '{}', using defaults", path.display());
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::PathIo {
        path: path.clone(),
        source: e,
    })?;
    let config: Config = toml::from_str(&content)?;
    tracing::debug!(
        "Loaded config from '{}' with {} queue(s)",
        path.display(),
        config.queues.len()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r##"
default_queue = "cluster"
tasks_dir = "/tmp/pbsq-tasks"

[queues.cluster]
address = "login.example.org"
task_template = "#!/bin/bash\n#PBS -l nodes={nodes}\n{command}\n"
submit_cmd = "qsub {job_file}"
status_cmd = "qstat {job_id}"
kill_cmd = "qdel {job_id}"
submit_cmd_output = "Job <{job_id}> submitted"
max_running_jobs = 10
account = "proj42"

[executor]
workers = ["node1:4", "node2:4"]
transport = "tcp"

[logging]
max_files = 5
"##;

    #[test]
    fn test_parse_sample_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let (name, queue) = config.queue(None).unwrap();
        assert_eq!(name, "cluster");
        assert_eq!(queue.address.as_deref(), Some("login.example.org"));
        assert_eq!(queue.submit_cmd_output(), "Job <{job_id}> submitted");
        assert_eq!(
            queue.extra.get("account"),
            Some(&serde_json::Value::from("proj42"))
        );
        assert_eq!(
            queue.extra.get("max_running_jobs"),
            Some(&serde_json::Value::from(10))
        );
        assert!(queue.validate_for_tasks(&name).is_ok());
        assert!(queue.validate_for_workflows(&name).is_err());

        assert_eq!(config.executor.transport, Transport::Tcp);
        assert_eq!(
            config.executor.workers,
            Some(WorkerSpec::NodeList(vec!["node1:4".into(), "node2:4".into()]))
        );
        assert_eq!(config.executor.ready_timeout_secs, 30);
        assert_eq!(config.logging.max_files, 5);
        assert_eq!(config.logging.max_age_days, 7);
        assert_eq!(config.workflows_dir, dirs::DEFAULT_WORKFLOWS_DIR);
    }

    #[test]
    fn test_job_template_is_accepted_as_fallback() {
        let queue = QueueConfig {
            job_template: Some("echo {task}".into()),
            ..Default::default()
        };
        assert_eq!(queue.task_template("q").unwrap(), "echo {task}");
    }

    #[test]
    fn test_missing_keys_are_reported_by_name() {
        let queue = QueueConfig {
            task_template: Some("x".into()),
            submit_cmd: Some("qsub".into()),
            ..Default::default()
        };
        let err = queue.validate_for_tasks("short").unwrap_err();
        match err {
            ConfigError::MissingQueueKey { queue, key } => {
                assert_eq!(queue, "short");
                assert_eq!(key, "status_cmd");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_queue_selection_errors() {
        let config = Config::default();
        assert!(matches!(
            config.queue(None),
            Err(ConfigError::NoQueueSelected)
        ));
        assert!(matches!(
            config.queue(Some("nope")),
            Err(ConfigError::QueueNotFound(_))
        ));
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.default_queue.as_deref(), Some("cluster"));
        assert_eq!(
            config.expanded_tasks_dir().unwrap(),
            PathBuf::from("/tmp/pbsq-tasks")
        );
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::PathIo { .. })));
    }
}
