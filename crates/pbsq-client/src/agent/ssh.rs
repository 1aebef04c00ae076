use super::{shell_quote, Agent, JobDir, OutputMode, RemoteCommand};
use crate::error::{ClientError, Result};
use pbsq_core::logging;
use std::path::Path;
use std::process::Command;

/// Runs batch-system commands on a login node over `ssh`.
pub struct SshAgent {
    name: String,
    address: String,
    tasks_dir: String,
    workflows_dir: String,
}

impl SshAgent {
    pub fn new(name: &str, address: &str, tasks_dir: &str, workflows_dir: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            tasks_dir: tasks_dir.trim_end_matches('/').to_string(),
            workflows_dir: workflows_dir.trim_end_matches('/').to_string(),
        }
    }

    fn remote_dir(&self, dir: JobDir, scope: Option<&str>) -> String {
        let root = match dir {
            JobDir::Tasks => &self.tasks_dir,
            JobDir::Workflows => &self.workflows_dir,
        };
        match scope {
            Some(s) => format!("{}/{}", root, s),
            None => root.clone(),
        }
    }

    fn run(&self, mut cmd: Command, description: &str) -> Result<std::process::Output> {
        logging::log_and_print_command(&cmd);
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(ClientError::CommandFailed {
                target: self.address.clone(),
                command: description.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(output)
    }
}

impl Agent for SshAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_job_file(&self, path: &Path, dir: JobDir, scope: Option<&str>) -> Result<()> {
        let remote_dir = self.remote_dir(dir, scope);
        let mkdir = RemoteCommand::new("mkdir").arg("-p").raw(&remote_dir);
        let mut ssh = Command::new("ssh");
        ssh.arg(&self.address).arg(mkdir.to_shell_string());
        self.run(ssh, &mkdir.to_shell_string())?;

        let target = format!("{}:{}/", self.address, remote_dir);
        let mut scp = Command::new("scp");
        scp.arg("-q").arg(path).arg(&target);
        self.run(scp, &format!("scp {} {}", path.display(), target))?;
        tracing::debug!("Sent {} to {} spool on {}", path.display(), dir.as_str(), self.address);
        Ok(())
    }

    fn check_output(&self, command: &str, mode: OutputMode) -> Result<String> {
        let remote = match mode {
            OutputMode::StdoutOnly => format!("sh -c {}", shell_quote(command)),
            OutputMode::MergeStderr => format!("sh -c {} 2>&1", shell_quote(command)),
        };
        let mut ssh = Command::new("ssh");
        ssh.arg(&self.address).arg(&remote);
        let output = self.run(ssh, command)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
