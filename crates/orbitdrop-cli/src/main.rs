//! Orbitdrop CLI - device-to-device text and file drop
//!
//! The binary runs the signaling hub and provides headless client commands
//! that work over the relay path.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the signaling hub
//! orbitdrop hub
//!
//! # See who is connected
//! orbitdrop devices
//!
//! # Send a file to a device id from `orbitdrop devices`
//! orbitdrop send --to 4f6a… ./document.pdf
//! ```

#![allow(clippy::doc_markdown)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Hub(args) => commands::hub::run(args).await,
        Command::Devices(args) => commands::devices::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,orbitdrop=info,orbitdrop_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
