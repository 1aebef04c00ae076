use crate::backend::QueueBackend;
use crate::error::Result;
use crate::registry::JobRegistry;
use crate::store::TaskStore;
use pbsq_core::model::{TaskId, TaskStatus};
use serde::Serialize;
use std::sync::Arc;

/// Verbosity at or below which only submitted tasks are probed.
pub const LOW_VERBOSITY: u8 = 2;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusEntry {
    pub task: TaskId,
    pub status: TaskStatus,
    pub job_id: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn get(&self, task: &TaskId) -> Option<&StatusEntry> {
        self.entries.iter().find(|e| &e.task == task)
    }
}

pub struct StatusReconciler {
    backend: Arc<dyn QueueBackend>,
    store: Arc<dyn TaskStore>,
    registry: JobRegistry,
}

impl StatusReconciler {
    pub fn new(backend: Arc<dyn QueueBackend>, store: Arc<dyn TaskStore>, registry: JobRegistry) -> Self {
        Self {
            backend,
            store,
            registry,
        }
    }

    pub fn query(&self, task_ids: &[TaskId], verbosity: u8) -> Result<StatusReport> {
        let mut report = StatusReport::default();
        for task in task_ids {
            let entry = if verbosity <= LOW_VERBOSITY {
                self.reconcile(task)
            } else {
                self.describe(task)
            };
            report.entries.push(entry.unwrap_or_else(|e| {
                tracing::warn!("Cannot read status of {}: {}", task, e);
                StatusEntry {
                    task: task.clone(),
                    status: TaskStatus::Failed,
                    job_id: None,
                    detail: format!("status unreadable: {}", e),
                }
            }));
        }
        Ok(report)
    }

    /// A submitted task whose job cannot be confirmed by the scheduler is failed.
    fn reconcile(&self, task: &TaskId) -> Result<StatusEntry> {
        let status = self.store.status(task)?;
        let mut entry = StatusEntry {
            task: task.clone(),
            status,
            job_id: None,
            detail: String::new(),
        };
        if status != TaskStatus::Submitted {
            return Ok(entry);
        }

        let identity = match self.registry.load(task.as_str()) {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                tracing::warn!("Task {} is submitted but has no job id record", task);
                entry.status = TaskStatus::Failed;
                return Ok(entry);
            }
            Err(e) => {
                tracing::warn!("Cannot read job id record of {}: {}", task, e);
                entry.status = TaskStatus::Failed;
                return Ok(entry);
            }
        };
        entry.job_id = Some(identity.job_id().to_string());

        match self.backend.probe_status(&identity, task) {
            Ok(output) => entry.detail = output,
            Err(e) => {
                tracing::warn!(
                    "Status of job {} ({}) could not be confirmed: {}",
                    identity.job_id(),
                    task,
                    e
                );
                entry.status = TaskStatus::Failed;
            }
        }
        Ok(entry)
    }

    fn describe(&self, task: &TaskId) -> Result<StatusEntry> {
        let status = self.store.status(task)?;
        let mut detail = self.store.detail(task)?;
        let identity = self.registry.load(task.as_str()).unwrap_or_else(|e| {
            tracing::debug!("Cannot read job id record of {}: {}", task, e);
            None
        });

        let job_id = identity.as_ref().map(|i| i.job_id().to_string());
        if let Some(identity) = identity {
            match self.backend.probe_status(&identity, task) {
                Ok(output) => detail.push_str(&output),
                Err(e) => tracing::debug!("Status probe for {} failed: {}", task, e),
            }
        }
        Ok(StatusEntry {
            task: task.clone(),
            status,
            job_id,
            detail,
        })
    }
}
