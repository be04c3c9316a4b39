//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// mealnudge - meal-logging reminder engine
#[derive(Parser, Debug)]
#[command(name = "mealnudge")]
#[command(version)]
#[command(about = "Keeps meal-logging reminders and local alarms in sync")]
#[command(long_about = "mealnudge computes when reminders fire and plans the alarms \
a snapshot of reminders needs. It can also run the engine in-process until interrupted.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the next fire instant of a single reminder
    Next {
        /// Local hour, 0-23
        #[arg(long)]
        hour: u8,

        /// Local minute, 0-59
        #[arg(long, default_value_t = 0)]
        minute: u8,

        /// Repetition kind
        #[arg(long, value_enum, default_value_t = RepeatKind::Daily)]
        repeat: RepeatKind,

        /// Weekdays for weekly reminders (mon,tue,...)
        #[arg(long, value_delimiter = ',')]
        days: Vec<String>,

        /// Treat a one-shot reminder as already delivered
        #[arg(long, default_value_t = false)]
        fired: bool,

        /// IANA timezone (defaults to UTC)
        #[arg(long)]
        tz: Option<String>,

        /// Evaluate at this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<String>,
    },

    /// Run one reconciliation pass over a JSON snapshot and print the schedule
    Plan {
        /// JSON file with a list of reminders
        #[arg(short, long)]
        reminders: PathBuf,

        /// TOML engine configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// IANA timezone, overriding the configuration
        #[arg(long)]
        tz: Option<String>,

        /// Evaluate at this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<String>,
    },

    /// Sign a demo user in and deliver reminders until Ctrl-C
    Run {
        /// JSON file with a list of reminders
        #[arg(short, long)]
        reminders: PathBuf,

        /// TOML engine configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// User id for the session
        #[arg(short, long, default_value = "demo")]
        user: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatKind {
    Once,
    Daily,
    Weekly,
}
