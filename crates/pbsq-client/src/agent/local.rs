use super::{Agent, JobDir, OutputMode};
use crate::error::{ClientError, Result};
use pbsq_core::logging;
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct LocalAgent {
    name: String,
    tasks_dir: PathBuf,
    workflows_dir: PathBuf,
}

impl LocalAgent {
    pub fn new(name: &str, tasks_dir: PathBuf, workflows_dir: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            tasks_dir,
            workflows_dir,
        }
    }

    fn spool_dir(&self, dir: JobDir, scope: Option<&str>) -> PathBuf {
        let root = match dir {
            JobDir::Tasks => &self.tasks_dir,
            JobDir::Workflows => &self.workflows_dir,
        };
        match scope {
            Some(s) => root.join(s),
            None => root.clone(),
        }
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

impl Agent for LocalAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_job_file(&self, path: &Path, dir: JobDir, scope: Option<&str>) -> Result<()> {
        let dest_dir = self.spool_dir(dir, scope);
        if path.parent().is_some_and(|p| same_dir(p, &dest_dir)) {
            return Ok(());
        }
        let file_name = path.file_name().ok_or_else(|| {
            ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{}' has no file name", path.display()),
            ))
        })?;
        fs_err::create_dir_all(&dest_dir)?;
        fs_err::copy(path, dest_dir.join(file_name))?;
        tracing::debug!(
            "Copied {} to {} spool {}",
            path.display(),
            dir.as_str(),
            dest_dir.display()
        );
        Ok(())
    }

    fn check_output(&self, command: &str, mode: OutputMode) -> Result<String> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        logging::log_and_print_command(&cmd);

        let output = cmd.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let combined = match mode {
            OutputMode::StdoutOnly => stdout,
            OutputMode::MergeStderr => stdout + &stderr,
        };

        if !output.status.success() {
            return Err(ClientError::CommandFailed {
                target: self.name.clone(),
                command: command.to_string(),
                stderr: match mode {
                    OutputMode::StdoutOnly => stderr,
                    OutputMode::MergeStderr => combined,
                },
            });
        }
        Ok(combined)
    }
}
