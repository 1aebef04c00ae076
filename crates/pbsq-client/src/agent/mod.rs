mod local;
mod remote_command;
mod ssh;

pub use local::LocalAgent;
pub use remote_command::{shell_quote, RemoteCommand};
pub use ssh::SshAgent;

use crate::error::Result;
use pbsq_core::config::QueueConfig;
use pbsq_core::constants::dirs;
use pbsq_core::context::ExecutionContext;
use std::path::Path;
use std::sync::Arc;

/// Which of the agent's spool directories a file belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDir {
    Tasks,
    Workflows,
}

impl JobDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobDir::Tasks => dirs::TASKS,
            JobDir::Workflows => dirs::WORKFLOWS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    StdoutOnly,
    /// Stderr is appended to stdout, which submission commands often need.
    MergeStderr,
}

/// The host on which the batch-system commands run.
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Makes `path` available in the agent's `dir` spool, under `scope` if given.
    fn send_job_file(&self, path: &Path, dir: JobDir, scope: Option<&str>) -> Result<()>;

    /// Runs a shell command and returns its output. A non-zero exit is an error.
    fn check_output(&self, command: &str, mode: OutputMode) -> Result<String>;
}

fn is_local_address(address: Option<&str>) -> bool {
    matches!(address, None | Some("") | Some("localhost") | Some("127.0.0.1"))
}

pub fn agent_for(queue: &str, config: &QueueConfig, ctx: &ExecutionContext) -> Arc<dyn Agent> {
    match config.address.as_deref() {
        Some(address) if !is_local_address(Some(address)) => Arc::new(SshAgent::new(
            queue,
            address,
            &ctx.config.tasks_dir,
            &ctx.config.workflows_dir,
        )),
        _ => Arc::new(LocalAgent::new(
            queue,
            ctx.tasks_dir.clone(),
            ctx.workflows_dir.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_addresses() {
        assert!(is_local_address(None));
        assert!(is_local_address(Some("localhost")));
        assert!(!is_local_address(Some("login.cluster.org")));
    }
}
