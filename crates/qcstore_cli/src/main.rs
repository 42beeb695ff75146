//! `qcstore` command-line entry point.
//!
//! # Responsibility
//! - Parse arguments, start optional file logging, dispatch commands.
//! - Print one JSON document per invocation; errors go to stderr.

mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use serde_json::json;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = commands::start_logging(&cli).and_then(|()| commands::run(cli));
    let code = report(result);
    qcstore_core::flush_logs();
    code
}

fn report(result: Result<commands::CommandOutput, commands::CliError>) -> ExitCode {
    match result {
        Ok(output) => {
            match serde_json::to_string_pretty(&output.body) {
                Ok(text) => println!("{text}"),
                Err(err) => {
                    eprintln!("{}", json!({ "error_code": "encode_failed", "message": err.to_string() }));
                    return ExitCode::FAILURE;
                }
            }
            if output.success {
                log::info!("event=cli_command module=cli status=ok");
                ExitCode::SUCCESS
            } else {
                log::warn!("event=cli_command module=cli status=unhealthy");
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            log::error!("event=cli_command module=cli status=error error_code={}", err.code());
            eprintln!(
                "{}",
                json!({ "error_code": err.code(), "message": err.to_string() })
            );
            if matches!(err, commands::CliError::Logging(_)) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
