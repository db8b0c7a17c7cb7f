//! Card issuance engine CLI
//!
//! Replays recorded provider webhooks against a seeded ledger and prints the
//! final card states.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --seed seed.csv events.jsonl > cards.csv
//! cargo run -- --seed seed.csv --fee-schedule fees.csv --decline-delay-ms 200 events.jsonl
//! RUST_LOG=debug cargo run -- --seed seed.csv --log-format json events.jsonl
//! ```
//!
//! Engine settings come from `CARD_ENGINE_*` environment variables (and a
//! `.env` file); command-line flags override them. Logs go to stderr, the
//! card CSV to stdout.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (invalid configuration, unreadable seed or events file, etc.)

use std::process;

use card_issuance_engine::cli::{self, LogFormat};
use card_issuance_engine::config::EngineConfig;
use card_issuance_engine::replay::run_replay;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.with_target(false).init(),
    }
}

fn main() {
    let args = cli::parse_args();
    init_tracing(args.log_format);

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    let options = args.to_replay_options();
    let mut output = std::io::stdout();
    if let Err(e) = runtime.block_on(run_replay(&options, &config, &mut output)) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
