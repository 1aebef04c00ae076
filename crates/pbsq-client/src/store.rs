use crate::error::Result;
use pbsq_core::constants::suffixes;
use pbsq_core::model::{TaskId, TaskStatus};
use std::path::PathBuf;

/// The workflow engine's own view of its tasks.
pub trait TaskStore: Send + Sync {
    fn status(&self, task: &TaskId) -> Result<TaskStatus>;
    fn detail(&self, task: &TaskId) -> Result<String>;
    fn set_status(&self, task: &TaskId, status: TaskStatus) -> Result<()>;
    /// Cancels the task locally and returns its resulting status.
    fn kill(&self, task: &TaskId) -> Result<TaskStatus>;
}

/// Keeps one `<task>.status` file per task next to the task files.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file(&self, task: &TaskId, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", task, suffix))
    }
}

impl TaskStore for FileTaskStore {
    fn status(&self, task: &TaskId) -> Result<TaskStatus> {
        let path = self.file(task, suffixes::STATUS);
        if !path.exists() {
            return Ok(if self.file(task, suffixes::TASK).exists() {
                TaskStatus::New
            } else {
                TaskStatus::Missing
            });
        }
        let content = fs_err::read_to_string(&path)?;
        let first = content.lines().next().unwrap_or_default();
        Ok(first.parse()?)
    }

    fn detail(&self, task: &TaskId) -> Result<String> {
        let status = self.status(task)?;
        let mut detail = format!("{}\t{}\n", task, status);
        let path = self.file(task, suffixes::STATUS);
        if path.exists() {
            for line in fs_err::read_to_string(&path)?.lines().skip(1) {
                detail.push_str(&format!("  {}\n", line));
            }
        }
        Ok(detail)
    }

    fn set_status(&self, task: &TaskId, status: TaskStatus) -> Result<()> {
        fs_err::create_dir_all(&self.dir)?;
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        fs_err::write(
            self.file(task, suffixes::STATUS),
            format!("{}\n{} since {}\n", status, status, stamp),
        )?;
        Ok(())
    }

    fn kill(&self, task: &TaskId) -> Result<TaskStatus> {
        let status = self.status(task)?;
        if status.is_terminal() || status == TaskStatus::Missing {
            return Ok(status);
        }
        self.set_status(task, TaskStatus::Killed)?;
        tracing::info!("{} ``killed``", task);
        Ok(TaskStatus::Killed)
    }
}
