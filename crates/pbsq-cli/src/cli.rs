use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pbsq",
    author,
    version,
    about = "Submits workflow tasks to PBS-style batch queues.",
    long_about = "Renders task scripts from per-queue templates, submits them with the queue's \
                  submit command, tracks their job ids and runs master tasks across workers."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file (default: $XDG_CONFIG_HOME/pbsq/config.toml)")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Queue to use, as named in the configuration")]
    pub queue: Option<String>,

    #[arg(
        short,
        long,
        global = true,
        default_value_t = 2,
        help = "Verbosity from 0 (errors only) to 4 (trace)"
    )]
    pub verbosity: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Render and submit tasks to the queue")]
    Submit(SubmitArgs),

    #[command(about = "Render and submit a workflow script")]
    SubmitWorkflow(SubmitWorkflowArgs),

    #[command(about = "Show the status of tasks, confirmed with the queue")]
    Status(StatusArgs),

    #[command(about = "Kill tasks and cancel their batch jobs")]
    Kill(KillArgs),

    #[command(about = "Run a task on this host, fanning out its sub-tasks")]
    Execute(ExecuteArgs),
}

#[derive(Args)]
pub struct SubmitArgs {
    #[arg(value_name = "TASK", required = true)]
    pub tasks: Vec<String>,

    #[arg(short = 'm', long, default_value = "run", help = "Run mode; 'dryrun' runs the script locally instead")]
    pub run_mode: String,

    #[arg(short = 's', long, default_value = "default")]
    pub sig_mode: String,
}

#[derive(Args)]
pub struct SubmitWorkflowArgs {
    #[arg(value_name = "NAME")]
    pub name: String,

    #[arg(
        short = 'p',
        long = "param",
        value_name = "KEY=VALUE",
        help = "Template parameter. Values are parsed as JSON when possible. Can be repeated."
    )]
    pub params: Vec<String>,

    #[arg(short = 'm', long, default_value = "run")]
    pub run_mode: String,
}

#[derive(Args)]
pub struct StatusArgs {
    #[arg(value_name = "TASK", required = true)]
    pub tasks: Vec<String>,

    #[arg(long, help = "Print the report as JSON")]
    pub json: bool,
}

#[derive(Args)]
pub struct KillArgs {
    #[arg(value_name = "TASK", required = true)]
    pub tasks: Vec<String>,

    #[arg(long, help = "Print the report as JSON")]
    pub json: bool,
}

#[derive(Args)]
pub struct ExecuteArgs {
    #[arg(value_name = "TASK")]
    pub task: String,

    #[arg(
        short = 'j',
        long = "workers",
        value_name = "SPEC",
        num_args = 1..,
        help = "Workers: a count, or host:count entries one per node"
    )]
    pub workers: Vec<String>,

    #[arg(short = 's', long, default_value = "default")]
    pub sig_mode: String,

    #[arg(short = 'm', long, default_value = "run")]
    pub run_mode: String,
}
