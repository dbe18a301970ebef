//! # Consolida command line
//!
//! ```text
//! main()
//!   │
//!   ├─> Console logging (RUST_LOG, default info)
//!   ├─> Parse CLI arguments (clap)
//!   └─> Dispatch: run | process | watch | stats | snapshots
//! ```
//!
//! Without a subcommand a single run is executed, so a scheduled task can
//! simply invoke `consolida`.

#![expect(clippy::print_stdout)]

mod cli;

use clap::Parser as _;

fn main() -> anyhow::Result<()> {
    consolida::logging::init_console()?;

    let cli = cli::Cli::parse();
    cli::run_command(cli)
}
