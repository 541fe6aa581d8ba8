//! `cube`: reshape and match spatio-temporal panels from the command line.

use std::process::ExitCode;

use clap::Parser;
use cube_cli::cli::{Cli, Command};
use cube_cli::commands::{run_inspect, run_long, run_match, run_unmatch};
use cube_cli::logging::init_logging;

mod summary;

fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.color.write_global();
    if let Err(error) = init_logging(&cli.log_config()) {
        eprintln!("error: cannot set up logging: {error}");
        return ExitCode::FAILURE;
    }
    match &cli.command {
        Command::Inspect(args) => finish(run_inspect(args), summary::print_inspect),
        Command::Long(args) => finish(run_long(args), summary::print_long),
        Command::Match(args) => finish(run_match(args), summary::print_match),
        Command::Unmatch(args) => finish(run_unmatch(args), summary::print_unmatch),
    }
}

/// Print the outcome of a command on success, the error chain otherwise.
fn finish<T>(result: anyhow::Result<T>, print: fn(&T)) -> ExitCode {
    match result {
        Ok(outcome) => {
            print(&outcome);
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::debug!(error = ?error, "command failed");
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
