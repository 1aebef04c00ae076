use super::{parse_task_ids, TaskServices};
use crate::cli::SubmitArgs;
use crate::error::CliError;
use colored::Colorize;
use pbsq_client::submission::{SubmissionOutcome, TaskSubmitter};
use pbsq_core::context::ExecutionContext;

pub fn handle_submit(ctx: ExecutionContext, args: SubmitArgs) -> Result<(), CliError> {
    let ctx = ctx.with_run_mode(args.run_mode).with_sig_mode(args.sig_mode);
    let task_ids = parse_task_ids(&args.tasks)?;
    let services = TaskServices::new(&ctx)?;
    let submitter = TaskSubmitter::new(ctx, services.backend, services.store);

    let total = task_ids.len();
    let mut failed = 0;
    for (task, outcome) in submitter.submit_all(&task_ids) {
        match outcome {
            Ok(SubmissionOutcome::Submitted(identity)) => {
                println!(
                    "{} submitted as job {}",
                    task.to_string().bold(),
                    identity.job_id().yellow()
                );
            }
            Ok(SubmissionOutcome::DryRun { output }) => print!("{}", output),
            Err(e) => {
                failed += 1;
                tracing::error!("Failed to submit {}: {}", task, e);
                eprintln!("{} {}: {}", "Failed".red().bold(), task, e);
            }
        }
    }

    if failed > 0 {
        return Err(CliError::SubmissionFailed { failed, total });
    }
    Ok(())
}
