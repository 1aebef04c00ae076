use super::new_table;
use crate::cli::ExecuteArgs;
use crate::error::CliError;
use colored::Colorize;
use comfy_table::{Cell, Color};
use pbsq_client::store::{FileTaskStore, TaskStore};
use pbsq_core::constants::keys;
use pbsq_core::context::ExecutionContext;
use pbsq_core::errors::DomainError;
use pbsq_core::model::{TaskId, TaskSpec, TaskStatus, WorkerSpec};
use pbsq_executor::{CombinedResult, MasterTaskExecutor, ShellSubTaskRunner};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Runtime as TokioRuntime;

fn print_plan(task: &TaskSpec, workers: &WorkerSpec) {
    println!("Task {} with workers {}", task.id.to_string().bold(), workers);
    let commands: Vec<(String, String)> = if task.is_master() {
        task.sub_tasks
            .iter()
            .map(|s| {
                let command = s
                    .params
                    .get(keys::COMMAND)
                    .or_else(|| task.common_params.as_ref().and_then(|c| c.get(keys::COMMAND)))
                    .and_then(Value::as_str)
                    .unwrap_or("-");
                (s.id.to_string(), command.to_string())
            })
            .collect()
    } else {
        let command = task.params.get(keys::COMMAND).and_then(Value::as_str).unwrap_or("-");
        vec![(task.id.to_string(), command.to_string())]
    };
    for (id, command) in commands {
        println!("  {}: {}", id, command);
    }
}

fn print_result(result: &CombinedResult) {
    if result.entries.len() > 1 {
        let mut table = new_table(&["Sub-task", "Node", "Exit code"]);
        for entry in &result.entries {
            let code = if entry.succeeded() {
                Cell::new(entry.exit_code).fg(Color::Green)
            } else {
                Cell::new(entry.exit_code).fg(Color::Red)
            };
            table.add_row(vec![
                Cell::new(entry.sub_id.as_str()),
                Cell::new(entry.node.as_deref().unwrap_or("-")),
                code,
            ]);
        }
        println!("{table}");
    }
    for output in &result.outputs {
        println!("{}", output);
    }
}

pub fn handle_execute(ctx: ExecutionContext, args: ExecuteArgs) -> Result<(), CliError> {
    let ctx = ctx.with_sig_mode(args.sig_mode).with_run_mode(args.run_mode);
    let task_id = TaskId::parse(&args.task)?;
    let path = ctx.task_spec_path(&task_id);
    if !path.exists() {
        return Err(DomainError::TaskNotFound(task_id).into());
    }
    let task = TaskSpec::load(&path)?;

    let workers = if args.workers.is_empty() {
        ctx.config.executor.workers.clone().unwrap_or_default()
    } else {
        WorkerSpec::from_cli(&args.workers)
    };
    if ctx.is_dryrun() {
        print_plan(&task, &workers);
        return Ok(());
    }

    let store = FileTaskStore::new(ctx.tasks_dir.clone());
    let runner = Arc::new(ShellSubTaskRunner::new(ctx.tasks_dir.clone()));
    let executor = MasterTaskExecutor::new(ctx, workers, runner)?;
    store.set_status(&task_id, TaskStatus::Running)?;

    let rt = TokioRuntime::new()?;
    let outcome = rt.block_on(async {
        if task.is_master() {
            executor.execute(&task).await
        } else {
            executor.execute_single(&task).await
        }
    });

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            store.set_status(&task_id, TaskStatus::Failed)?;
            return Err(e.into());
        }
    };
    print_result(&result);

    if result.is_success() {
        store.set_status(&task_id, TaskStatus::Completed)?;
        tracing::info!("{} ``completed``", task_id);
        return Ok(());
    }

    store.set_status(&task_id, TaskStatus::Failed)?;
    let message = match &result.abort_reason {
        Some(reason) => reason.clone(),
        None => {
            let failed: Vec<String> = result.failed.iter().map(|t| t.to_string()).collect();
            format!("failed sub-tasks: {}", failed.join(", "))
        }
    };
    Err(CliError::ExecutionFailed {
        task: task_id.to_string(),
        exit_code: result.exit_code,
        message,
    })
}
