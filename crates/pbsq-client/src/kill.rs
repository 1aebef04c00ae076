use crate::backend::QueueBackend;
use crate::error::Result;
use crate::registry::JobRegistry;
use crate::store::TaskStore;
use pbsq_core::model::{TaskId, TaskStatus};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum KillAction {
    /// The task was not in a state that warrants cancelling its job.
    NotKilled,
    Skipped { reason: String },
    Killed { job_id: String, output: String },
    Failed { job_id: String, error: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KillEntry {
    pub task: TaskId,
    pub status: TaskStatus,
    pub action: KillAction,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct KillReport {
    pub entries: Vec<KillEntry>,
}

impl KillReport {
    pub fn get(&self, task: &TaskId) -> Option<&KillEntry> {
        self.entries.iter().find(|e| &e.task == task)
    }
}

/// Cancels tasks locally, then cancels the scheduler jobs of those that ended up killed.
/// A task whose local status cannot be read is reported and skipped.
pub struct KillCascade {
    backend: Arc<dyn QueueBackend>,
    store: Arc<dyn TaskStore>,
    registry: JobRegistry,
}

impl KillCascade {
    pub fn new(backend: Arc<dyn QueueBackend>, store: Arc<dyn TaskStore>, registry: JobRegistry) -> Self {
        Self {
            backend,
            store,
            registry,
        }
    }

    /// Every task gets an entry. A task whose local status cannot be read
    /// is reported as failed and does not stop the others.
    pub fn kill(&self, task_ids: &[TaskId]) -> Result<KillReport> {
        let local: Vec<_> = task_ids
            .iter()
            .map(|task| (task.clone(), self.store.kill(task)))
            .collect();

        let entries = local
            .into_iter()
            .map(|(task, killed)| match killed {
                Ok(status) => {
                    let action = if status.wants_remote_kill() {
                        self.kill_job(&task)
                    } else {
                        KillAction::NotKilled
                    };
                    KillEntry {
                        task,
                        status,
                        action,
                    }
                }
                Err(e) => {
                    tracing::warn!("Cannot cancel task {} locally: {}", task, e);
                    KillEntry {
                        task,
                        status: TaskStatus::Failed,
                        action: KillAction::Skipped {
                            reason: format!("local status unreadable: {}", e),
                        },
                    }
                }
            })
            .collect();
        Ok(KillReport { entries })
    }

    fn kill_job(&self, task: &TaskId) -> KillAction {
        let identity = match self.registry.load(task.as_str()) {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                return KillAction::Skipped {
                    reason: format!("no job id recorded for {}", task),
                }
            }
            Err(e) => {
                return KillAction::Skipped {
                    reason: format!("job id record of {} unreadable: {}", task, e),
                }
            }
        };

        match self.backend.kill(&identity, task) {
            Ok(output) => {
                tracing::info!("Job {} of task {} cancelled", identity.job_id(), task);
                KillAction::Killed {
                    job_id: identity.job_id().to_string(),
                    output,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to cancel job {} of task {}: {}", identity.job_id(), task, e);
                KillAction::Failed {
                    job_id: identity.job_id().to_string(),
                    error: e.to_string(),
                }
            }
        }
    }
}
