//! kvguard command line client
//!
//! Loads configuration, installs logging and metrics, then runs one lock or
//! filter command against the configured store.

mod cli;
mod commands;
mod config;
mod logging;
mod metrics;

use std::process::ExitCode;

use clap::Parser;
use kvguard_common::KvGuardError;
use tracing::error;

use crate::cli::Cli;
use crate::config::Configuration;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let configuration = match Configuration::new(&cli.global) {
        Ok(configuration) => configuration,
        Err(e) => {
            eprintln!("kvguard: failed to load configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logging(&configuration.log_level()) {
        eprintln!("kvguard: failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    let started = configuration
        .prometheus_address()
        .and_then(metrics::init_metrics);
    if let Err(e) = started {
        error!(error = %e, "Failed to initialize metrics");
        return ExitCode::FAILURE;
    }

    match commands::run(cli.command, &configuration).await {
        Ok(code) => code,
        Err(e) => {
            let code = e
                .downcast_ref::<KvGuardError>()
                .map(|kv| kv.error_code().code);
            error!(code = ?code, "Command failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
