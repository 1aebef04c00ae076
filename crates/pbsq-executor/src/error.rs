use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Config(#[from] pbsq_core::errors::ConfigError),

    #[error(transparent)]
    Domain(#[from] pbsq_core::errors::DomainError),

    #[error("Coordinator did not report readiness within {timeout_secs}s")]
    CoordinatorNotReady { timeout_secs: u64 },

    #[error("Timed out after {timeout_secs}s waiting for sub-task results ({received} of {expected} received)")]
    CollectTimeout {
        received: usize,
        expected: usize,
        timeout_secs: f64,
    },

    #[error("Control channel closed: {0}")]
    ChannelClosed(String),

    #[error("Result transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed control message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sub-task '{sub_id}' failed: {message}")]
    SubTask { sub_id: String, message: String },
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
