use pbsq_core::model::TaskId;
use pbsq_core::template::TemplateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] pbsq_core::errors::ConfigError),

    #[error(transparent)]
    Domain(#[from] pbsq_core::errors::DomainError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to render {context}: {source}")]
    Template {
        context: String,
        #[source]
        source: TemplateError,
    },

    #[error("Failed to submit task {task}: command '{command}' produced no output.")]
    NoOutput { task: TaskId, command: String },

    #[error("Failed to extract job_id from \"{output}\" using pattern \"{pattern}\"")]
    JobIdExtraction { output: String, pattern: String },

    #[error("Command '{command}' failed on '{target}': {stderr}")]
    CommandFailed {
        target: String,
        command: String,
        stderr: String,
    },

    #[error("Failed to persist job id record for '{name}': {reason}")]
    Registry { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;
