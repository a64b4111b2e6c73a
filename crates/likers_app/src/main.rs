mod cli;
mod commands;
mod exit;

use std::process::ExitCode;

use clap::Parser;
use engine_logging::{engine_error, LogDestination};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    engine_logging::initialize(
        LogDestination::terminal_and(cli.logging.log_file.as_deref()),
        cli.logging.log_level,
    );

    let result = match cli.command {
        Commands::Run(args) => commands::run(args).await,
        Commands::Status(args) => commands::status(args),
        Commands::Export(args) => commands::export(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            engine_error!("{:#}", err);
            ExitCode::from(exit::code_for(&err))
        }
    }
}
