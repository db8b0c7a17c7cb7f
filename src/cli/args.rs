use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::replay::ReplayOptions;

/// Replay provider webhooks against a seeded card ledger
#[derive(Parser, Debug)]
#[command(name = "card-engine")]
#[command(about = "Replay card provider webhooks against a seeded ledger", long_about = None)]
pub struct CliArgs {
    /// JSON-lines file with one webhook body per line
    #[arg(value_name = "EVENTS", help = "Path to the webhook events file")]
    pub events_file: PathBuf,

    /// Seed CSV describing companies, wallets, customers, cards and pending issuances
    #[arg(long = "seed", value_name = "CSV", help = "Path to the seed CSV file")]
    pub seed_file: PathBuf,

    /// Fee schedule CSV (kind,min,max,fee_type,value)
    #[arg(
        long = "fee-schedule",
        value_name = "CSV",
        help = "Fee schedule CSV; built-in default fees are used without it"
    )]
    pub fee_schedule: Option<PathBuf>,

    /// Delay before a decline's fee is verified
    #[arg(
        long = "decline-delay-ms",
        value_name = "MILLIS",
        help = "Delay before decline fee verification (default: configured value)"
    )]
    pub decline_delay_ms: Option<u64>,

    /// Tokio worker threads
    #[arg(
        long = "worker-threads",
        value_name = "COUNT",
        help = "Number of runtime worker threads (default: CPU cores)"
    )]
    pub worker_threads: Option<usize>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "pretty", env = "LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// Log output formats
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl CliArgs {
    /// Worker thread count, falling back to the number of CPU cores when
    /// absent or zero
    pub fn worker_threads(&self) -> usize {
        match self.worker_threads {
            Some(count) if count > 0 => count,
            _ => num_cpus::get(),
        }
    }

    /// Build replay options from the parsed arguments
    pub fn to_replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            events: self.events_file.clone(),
            seed: self.seed_file.clone(),
            fee_schedule: self.fee_schedule.clone(),
            decline_delay: self.decline_delay_ms.map(Duration::from_millis),
        }
    }
}
