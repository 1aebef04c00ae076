use super::{new_table, parse_task_ids, status_cell, TaskServices};
use crate::cli::KillArgs;
use crate::error::CliError;
use comfy_table::{Cell, Color};
use pbsq_client::kill::{KillAction, KillCascade};
use pbsq_core::context::ExecutionContext;

pub fn handle_kill(ctx: ExecutionContext, args: KillArgs) -> Result<(), CliError> {
    let task_ids = parse_task_ids(&args.tasks)?;
    let services = TaskServices::new(&ctx)?;
    let cascade = KillCascade::new(services.backend, services.store, services.registry);
    let report = cascade.kill(&task_ids)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut table = new_table(&["Task", "Status", "Batch job"]);
    for entry in &report.entries {
        let action = match &entry.action {
            KillAction::NotKilled => Cell::new("-"),
            KillAction::Skipped { reason } => Cell::new(format!("skipped: {}", reason)).fg(Color::Grey),
            KillAction::Killed { job_id, .. } => Cell::new(format!("{} cancelled", job_id)).fg(Color::Green),
            KillAction::Failed { job_id, error } => {
                Cell::new(format!("{} not cancelled: {}", job_id, error)).fg(Color::Red)
            }
        };
        table.add_row(vec![
            Cell::new(entry.task.as_str()),
            status_cell(entry.status),
            action,
        ]);
    }
    println!("{table}");
    Ok(())
}
