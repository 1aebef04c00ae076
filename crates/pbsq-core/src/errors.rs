use crate::model::TaskId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path '{path}': {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse task file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    General(String),

    #[error("Queue '{0}' is not defined in the configuration.")]
    QueueNotFound(String),

    #[error("No queue selected. Please set 'default_queue' in your config or use the --queue flag.")]
    NoQueueSelected,

    #[error("Missing configuration {key} for queue {queue}")]
    MissingQueueKey { queue: String, key: String },

    #[error("Option submit_cmd_output should have at least a pattern for job_id, \"{0}\" specified.")]
    MissingJobIdPattern(String),

    #[error("Invalid output pattern \"{pattern}\": {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unacceptable worker specification {0}")]
    WorkerSpec(String),

    #[error("Could not determine HOME directory.")]
    HomeDirectoryNotFound,
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Task '{0}' not found in the task directory.")]
    TaskNotFound(TaskId),

    #[error("Invalid task id '{0}'. Task ids may only contain alphanumerics, '-', '_' and '.'.")]
    InvalidTaskId(String),

    #[error("Unknown task status '{0}'.")]
    UnknownStatus(String),

    #[error("Task '{task}' has duplicate sub-task id '{sub_id}'.")]
    DuplicateSubTask { task: TaskId, sub_id: TaskId },
}
