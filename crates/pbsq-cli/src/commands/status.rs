use super::{new_table, parse_task_ids, status_cell, TaskServices};
use crate::cli::StatusArgs;
use crate::error::CliError;
use comfy_table::Cell;
use pbsq_client::status::StatusReconciler;
use pbsq_core::context::ExecutionContext;

pub fn handle_status(ctx: ExecutionContext, args: StatusArgs) -> Result<(), CliError> {
    let task_ids = parse_task_ids(&args.tasks)?;
    let services = TaskServices::new(&ctx)?;
    let reconciler = StatusReconciler::new(services.backend, services.store, services.registry);
    let report = reconciler.query(&task_ids, ctx.verbosity)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut table = new_table(&["Task", "Status", "Job ID", "Detail"]);
    for entry in &report.entries {
        table.add_row(vec![
            Cell::new(entry.task.as_str()),
            status_cell(entry.status),
            Cell::new(entry.job_id.as_deref().unwrap_or("-")),
            Cell::new(entry.detail.trim()),
        ]);
    }
    println!("{table}");
    Ok(())
}
