//! Command line of the `card-engine` replay binary

mod args;

pub use args::{CliArgs, LogFormat};

use clap::Parser;

/// Read the replay arguments from the process command line
///
/// Exits with clap's usage message on `--help` or invalid input.
pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}
