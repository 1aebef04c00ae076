use crate::error::CliError;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets, Attribute, Cell, Color, Table};
use pbsq_client::agent::agent_for;
use pbsq_client::backend::{PbsBackend, QueueBackend};
use pbsq_client::registry::JobRegistry;
use pbsq_client::store::{FileTaskStore, TaskStore};
use pbsq_core::context::ExecutionContext;
use pbsq_core::model::{TaskId, TaskStatus};
use std::sync::Arc;

pub mod execute;
pub mod kill;
pub mod status;
pub mod submit;
pub mod workflow;

/// The queue backend and bookkeeping shared by the task commands.
pub struct TaskServices {
    pub backend: Arc<dyn QueueBackend>,
    pub store: Arc<dyn TaskStore>,
    pub registry: JobRegistry,
}

impl TaskServices {
    pub fn new(ctx: &ExecutionContext) -> Result<Self, CliError> {
        let (queue, queue_config) = ctx.queue_config()?;
        let agent = agent_for(&queue, queue_config, ctx);
        let backend = PbsBackend::for_tasks(&queue, queue_config.clone(), agent)?;
        Ok(Self {
            backend: Arc::new(backend),
            store: Arc::new(FileTaskStore::new(ctx.tasks_dir.clone())),
            registry: JobRegistry::new(ctx.tasks_dir.clone()),
        })
    }
}

pub(crate) fn parse_task_ids(raw: &[String]) -> Result<Vec<TaskId>, CliError> {
    raw.iter()
        .map(|s| TaskId::parse(s).map_err(CliError::from))
        .collect()
}

pub(crate) fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    table
}

pub(crate) fn status_cell(status: TaskStatus) -> Cell {
    let color = match status {
        TaskStatus::Completed => Color::Green,
        TaskStatus::Submitted | TaskStatus::Running | TaskStatus::Pending => Color::Yellow,
        TaskStatus::Failed | TaskStatus::Aborted | TaskStatus::Killed => Color::Red,
        TaskStatus::New | TaskStatus::Missing => Color::Grey,
    };
    Cell::new(status.to_string()).fg(color)
}
