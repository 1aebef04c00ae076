use crate::cli::SubmitWorkflowArgs;
use crate::error::CliError;
use colored::Colorize;
use pbsq_client::agent::agent_for;
use pbsq_client::backend::PbsBackend;
use pbsq_client::submission::{SubmissionOutcome, WorkflowSubmitter};
use pbsq_core::context::ExecutionContext;
use pbsq_core::model::Params;
use serde_json::Value;
use std::sync::Arc;

/// `key=value`, with the value taken as JSON when it parses and as a string otherwise.
fn parse_params(raw: &[String]) -> Result<Params, CliError> {
    let mut params = Params::new();
    for item in raw {
        let (key, value) = item
            .split_once('=')
            .filter(|(k, _)| !k.trim().is_empty())
            .ok_or_else(|| CliError::InvalidParam(item.clone()))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
        params.insert(key.trim().to_string(), value);
    }
    Ok(params)
}

pub fn handle_submit_workflow(ctx: ExecutionContext, args: SubmitWorkflowArgs) -> Result<(), CliError> {
    let ctx = ctx.with_run_mode(args.run_mode);
    let params = parse_params(&args.params)?;
    let (queue, queue_config) = ctx.queue_config()?;
    let agent = agent_for(&queue, queue_config, &ctx);
    let backend = PbsBackend::for_workflows(&queue, queue_config.clone(), agent)?;
    let submitter = WorkflowSubmitter::new(ctx.clone(), Arc::new(backend));

    match submitter.submit(&args.name, &params)? {
        SubmissionOutcome::Submitted(identity) => println!(
            "Workflow {} submitted as job {}",
            args.name.bold(),
            identity.job_id().yellow()
        ),
        SubmissionOutcome::DryRun { output } => print!("{}", output),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params_json_and_strings() {
        let params = parse_params(&[
            "script=run.sos".to_string(),
            "cores=4".to_string(),
            "targets=[\"a\",\"b\"]".to_string(),
        ])
        .unwrap();
        assert_eq!(params["script"], Value::from("run.sos"));
        assert_eq!(params["cores"], Value::from(4));
        assert_eq!(params["targets"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_parse_params_rejects_missing_key() {
        assert!(parse_params(&["=x".to_string()]).is_err());
        assert!(parse_params(&["novalue".to_string()]).is_err());
    }
}
