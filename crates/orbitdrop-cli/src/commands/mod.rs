//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, commands fall back
/// to defaults rather than refusing to run.
pub fn load_config() -> orbitdrop_core::config::Config {
    orbitdrop_core::config::Config::load().unwrap_or_default()
}

pub mod config;
pub mod devices;
pub mod hub;
pub mod send;

/// Orbitdrop - device-to-device text and file drop
#[derive(Parser)]
#[command(name = "orbitdrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run the signaling hub
    Hub(HubArgs),

    /// List devices connected to the hub
    Devices(DevicesArgs),

    /// Send text or a file to a device (relay path)
    Send(SendArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

/// Arguments for the hub command
#[derive(clap::Args)]
pub struct HubArgs {
    /// Address to bind, e.g. 0.0.0.0:8787 (defaults to the config value)
    #[arg(long)]
    pub bind: Option<String>,
}

/// Arguments for the devices command
#[derive(clap::Args)]
pub struct DevicesArgs {
    /// Hub WebSocket URL (defaults to the config value)
    #[arg(long)]
    pub hub: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Seconds to wait for the presence list
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,
}

/// Arguments for the send command
#[derive(clap::Args)]
pub struct SendArgs {
    /// Recipient device id (see `orbitdrop devices`)
    #[arg(long)]
    pub to: String,

    /// Hub WebSocket URL (defaults to the config value)
    #[arg(long)]
    pub hub: Option<String>,

    /// Text to send instead of a file
    #[arg(long, conflicts_with = "path")]
    pub text: Option<String>,

    /// File to send
    #[arg(required_unless_present = "text")]
    pub path: Option<PathBuf>,

    /// Seconds to wait for the send to finish
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

/// Arguments for the config command
#[derive(clap::Args)]
pub struct ConfigArgs {
    /// Print the config file path only
    #[arg(long)]
    pub path: bool,
}
