//! # delivery-closure
//!
//! Entry point for the delivery execution closure coordinator.
//!
//! - `scan`: find expired timer keys, delete them, publish closure requests
//! - `consume`: resolve closure requests until the idle window elapses
//! - `schedule`: write a timer key
//!
//! Exit codes: 0 on success, 2 on invalid configuration, 1 on any other failure.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod commands;
mod config;
mod logging;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use crate::cli::{Cli, Commands};
use crate::config::{ConsumeSettings, ScanSettings};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "delivery-closure failed");
            exit_code(&e)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = config::store_config(&cli.store)?;

    match cli.command {
        Commands::Scan {
            namespace,
            request_topic,
            instant_unit,
            request_type,
        } => {
            let settings = ScanSettings::new(&namespace, &request_topic, instant_unit, &request_type)?;
            info!(namespace = %settings.namespace, unit = %settings.unit, "Starting scan");
            commands::scan(&store, settings).await
        }
        Commands::Consume {
            request_topic,
            result_topic,
            idle_window_secs,
            concurrency,
            ack_mode,
            result_type,
        } => {
            let settings = ConsumeSettings::new(
                &request_topic,
                &result_topic,
                &result_type,
                idle_window_secs,
                concurrency,
                ack_mode,
            )?;
            commands::consume(&store, settings).await
        }
        Commands::Schedule {
            namespace,
            id,
            delay_secs,
            at,
            instant_unit,
        } => {
            let key = config::timer_key(&namespace, &id, at, delay_secs, instant_unit)?;
            commands::schedule(&store, key).await
        }
    }
}

fn exit_code(e: &anyhow::Error) -> ExitCode {
    match e.downcast_ref::<closure_core::Error>() {
        Some(closure_core::Error::Configuration { .. }) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_exit_with_two() {
        let e = anyhow::Error::from(closure_core::Error::configuration("concurrency", "must be greater than zero"));
        assert_eq!(exit_code(&e), ExitCode::from(2));
    }

    #[test]
    fn test_other_errors_exit_with_one() {
        let e = anyhow::Error::from(closure_core::Error::connection("refused"))
            .context("Failed to connect to store");
        assert_eq!(exit_code(&e), ExitCode::FAILURE);
    }
}
