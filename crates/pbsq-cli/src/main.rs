use clap::Parser;
use colored::Colorize;
use pbsq_core::config::load_config;
use pbsq_core::context::ExecutionContext;
use pbsq_core::logging::{self, LogLevel};

mod cli;
mod commands;
mod error;

use cli::{Cli, Commands};
use error::CliError;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        tracing::error!("{}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    logging::set_log_level(LogLevel::from(cli.verbosity));
    logging::set_log_level_from_env();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_stderr_logger();
            return Err(e.into());
        }
    };
    if let Err(e) = logging::init_session_logger(&config.logging) {
        logging::init_stderr_logger();
        tracing::warn!("Could not create session log: {}", e);
    }

    let ctx = ExecutionContext::new(config, cli.queue)?.with_verbosity(cli.verbosity);
    match cli.command {
        Commands::Submit(args) => commands::submit::handle_submit(ctx, args),
        Commands::SubmitWorkflow(args) => commands::workflow::handle_submit_workflow(ctx, args),
        Commands::Status(args) => commands::status::handle_status(ctx, args),
        Commands::Kill(args) => commands::kill::handle_kill(ctx, args),
        Commands::Execute(args) => commands::execute::handle_execute(ctx, args),
    }
}
