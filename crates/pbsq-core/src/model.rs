use crate::constants::keys;
use crate::errors::{ConfigError, DomainError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub type Params = BTreeMap<String, Value>;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TaskId {
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let valid = !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !s.starts_with('.');
        if valid {
            Ok(TaskId(s.to_string()))
        } else {
            Err(DomainError::InvalidTaskId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Content-derived id: the same script and parameters always hash to the same task.
    pub fn from_content(script: &str, params: &Params) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(script.as_bytes());
        hasher.update(b"\0");
        hasher.update(serde_json::to_string(params).unwrap_or_default().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        TaskId(digest[..32].to_string())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    New,
    Pending,
    Submitted,
    Running,
    Completed,
    Failed,
    Aborted,
    Killed,
    Missing,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Aborted | TaskStatus::Killed
        )
    }

    /// Statuses after which the batch system job should also be cancelled.
    pub fn wants_remote_kill(&self) -> bool {
        matches!(self, TaskStatus::Killed | TaskStatus::Aborted)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::New => "new",
            TaskStatus::Pending => "pending",
            TaskStatus::Submitted => "submitted",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Aborted => "aborted",
            TaskStatus::Killed => "killed",
            TaskStatus::Missing => "missing",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "new" => Ok(TaskStatus::New),
            "pending" => Ok(TaskStatus::Pending),
            "submitted" => Ok(TaskStatus::Submitted),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "aborted" => Ok(TaskStatus::Aborted),
            "killed" => Ok(TaskStatus::Killed),
            "missing" => Ok(TaskStatus::Missing),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuntimeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walltime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_mode: Option<String>,
    #[serde(flatten)]
    pub extra: Params,
}

impl RuntimeParams {
    pub fn to_params(&self) -> Params {
        let mut params = self.extra.clone();
        if let Some(v) = &self.walltime {
            params.insert(keys::WALLTIME.into(), Value::from(v.clone()));
        }
        if let Some(v) = self.cores {
            params.insert(keys::CORES.into(), Value::from(v));
        }
        if let Some(v) = &self.mem {
            params.insert(keys::MEM.into(), Value::from(v.clone()));
        }
        if let Some(v) = self.nodes {
            params.insert(keys::NODES.into(), Value::from(v));
        }
        if let Some(v) = &self.workdir {
            params.insert(
                keys::WORKDIR.into(),
                Value::from(v.to_string_lossy().to_string()),
            );
        }
        if let Some(v) = self.verbosity {
            params.insert(keys::VERBOSITY.into(), Value::from(v));
        }
        if let Some(v) = &self.sig_mode {
            params.insert(keys::SIG_MODE.into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.run_mode {
            params.insert(keys::RUN_MODE.into(), Value::from(v.clone()));
        }
        params
    }

    /// Fields set in `other` win.
    pub fn overlay(&mut self, other: &RuntimeParams) {
        if other.walltime.is_some() {
            self.walltime = other.walltime.clone();
        }
        if other.cores.is_some() {
            self.cores = other.cores;
        }
        if other.mem.is_some() {
            self.mem = other.mem.clone();
        }
        if other.nodes.is_some() {
            self.nodes = other.nodes;
        }
        if other.workdir.is_some() {
            self.workdir = other.workdir.clone();
        }
        if other.verbosity.is_some() {
            self.verbosity = other.verbosity;
        }
        if other.sig_mode.is_some() {
            self.sig_mode = other.sig_mode.clone();
        }
        if other.run_mode.is_some() {
            self.run_mode = other.run_mode.clone();
        }
        self.extra
            .extend(other.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Worker budget for a master task: `4`, `"host:4"`, `["a:4", "b:4"]` or absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "RawWorkerSpec", into = "RawWorkerSpec")]
pub enum WorkerSpec {
    Fixed(i64),
    NodeList(Vec<String>),
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawWorkerSpec {
    Int(i64),
    Str(String),
    List(Vec<String>),
    Null,
}

impl From<RawWorkerSpec> for WorkerSpec {
    fn from(raw: RawWorkerSpec) -> Self {
        match raw {
            RawWorkerSpec::Int(n) => WorkerSpec::Fixed(n),
            RawWorkerSpec::Str(s) => WorkerSpec::NodeList(vec![s]),
            RawWorkerSpec::List(list) => WorkerSpec::NodeList(list),
            RawWorkerSpec::Null => WorkerSpec::Auto,
        }
    }
}

impl From<WorkerSpec> for RawWorkerSpec {
    fn from(spec: WorkerSpec) -> Self {
        match spec {
            WorkerSpec::Fixed(n) => RawWorkerSpec::Int(n),
            WorkerSpec::NodeList(list) => RawWorkerSpec::List(list),
            WorkerSpec::Auto => RawWorkerSpec::Null,
        }
    }
}

impl WorkerSpec {
    /// `-j 4`, `-j host:4` or `-j a:4 b:4`. Nothing given means automatic.
    pub fn from_cli(args: &[String]) -> Self {
        match args {
            [] => WorkerSpec::Auto,
            [single] => match single.trim().parse::<i64>() {
                Ok(n) => WorkerSpec::Fixed(n),
                Err(_) => WorkerSpec::NodeList(vec![single.clone()]),
            },
            many => WorkerSpec::NodeList(many.to_vec()),
        }
    }
}

impl fmt::Display for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerSpec::Fixed(n) => write!(f, "{}", n),
            WorkerSpec::NodeList(list) => write!(f, "{:?}", list),
            WorkerSpec::Auto => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: TaskId,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub runtime: RuntimeParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    #[serde(default)]
    pub runtime: RuntimeParams,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub sig_content: BTreeMap<String, Value>,
    #[serde(default)]
    pub sub_tasks: Vec<SubTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_params: Option<Params>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk_workers: Option<WorkerSpec>,
}

impl TaskSpec {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            runtime: RuntimeParams::default(),
            params: Params::new(),
            sig_content: BTreeMap::new(),
            sub_tasks: Vec::new(),
            common_params: None,
            trunk_workers: None,
        }
    }

    pub fn new_hashed(script: &str, params: Params) -> Self {
        let mut spec = Self::new(TaskId::from_content(script, &params));
        spec.params = params;
        spec
    }

    pub fn is_master(&self) -> bool {
        !self.sub_tasks.is_empty()
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let mut seen = std::collections::HashSet::new();
        for sub in &self.sub_tasks {
            if !seen.insert(&sub.id) {
                return Err(DomainError::DuplicateSubTask {
                    task: self.id.clone(),
                    sub_id: sub.id.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::PathIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::PathIo {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Named captures scraped from the submission command's output. Always carries `job_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobIdentity {
    fields: BTreeMap<String, String>,
}

impl JobIdentity {
    pub fn new(fields: BTreeMap<String, String>) -> Option<Self> {
        match fields.get(keys::JOB_ID) {
            Some(id) if !id.is_empty() => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn job_id(&self) -> &str {
        self.fields
            .get(keys::JOB_ID)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn to_params(&self) -> Params {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect()
    }

    pub fn to_record(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}: {}\n", k, v))
            .collect()
    }

    pub fn parse_record(content: &str) -> Option<Self> {
        let mut fields = BTreeMap::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((k, v)) => {
                    fields.insert(k.trim().to_string(), v.trim().to_string());
                }
                None => tracing::warn!("Ignoring malformed job id record line '{}'", line),
            }
        }
        Self::new(fields)
    }
}
