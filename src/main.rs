//! # mealnudge
//!
//! Command-line front end for the reminder scheduling engine.
//!
//! - `next` resolves the next fire instant of one reminder
//! - `plan` runs a single reconciliation pass over a JSON snapshot
//! - `run` signs a user in and delivers reminders until interrupted
//!
//! Logs go to stderr so command output on stdout stays machine-readable.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    commands::execute_command(cli.command).await
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mealnudge=info,mealnudge_reminders=info")),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
