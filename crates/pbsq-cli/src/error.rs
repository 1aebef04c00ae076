use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] pbsq_core::errors::ConfigError),

    #[error(transparent)]
    Domain(#[from] pbsq_core::errors::DomainError),

    #[error(transparent)]
    Client(#[from] pbsq_client::ClientError),

    #[error(transparent)]
    Executor(#[from] pbsq_executor::ExecutorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Invalid parameter '{0}', expected KEY=VALUE")]
    InvalidParam(String),

    #[error("{failed} of {total} tasks could not be submitted")]
    SubmissionFailed { failed: usize, total: usize },

    #[error("Task {task} failed with exit code {exit_code}: {message}")]
    ExecutionFailed {
        task: String,
        exit_code: i32,
        message: String,
    },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ExecutionFailed { exit_code, .. } if *exit_code > 0 => *exit_code,
            _ => 1,
        }
    }
}
