//! Command-line surface.
//!
//! Global flags mirror the usual conventions: config path and state dir
//! overridable by flag or environment, `NO_COLOR` honored, and the
//! gateway URL overridable per invocation.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(
    name = "whatsblitz",
    version,
    about = "Bulk personalized WhatsApp Web messaging driven by spreadsheet data"
)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Path to a config.toml file
    #[arg(
        short = 'c',
        long,
        value_name = "PATH",
        env = "WHATSBLITZ_CONFIG",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// State directory (default: ~/.whatsblitz)
    #[arg(long, value_name = "DIR", env = "WHATSBLITZ_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Disable coloured terminal output
    #[arg(long = "no-color", action = ArgAction::SetTrue, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    /// Gateway WebSocket URL (ws://…)
    #[arg(
        long = "gateway",
        value_name = "WS_URL",
        env = "WHATSBLITZ_GATEWAY",
        global = true
    )]
    pub gateway: Option<String>,
}

impl CommonArgs {
    /// The config file to load, honouring `--state-dir`.
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(config) = &self.config {
            return Some(config.clone());
        }
        self.state_dir.as_ref().map(|dir| dir.join("config.toml"))
    }

    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(gateway) = &self.gateway {
            config.gateway_url = gateway.clone();
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the automation daemon
    Gateway {
        #[command(subcommand)]
        action: GatewayAction,
    },
    /// Ingest a roster file and send the whole batch
    Send {
        /// Path to a .csv, .xlsx, or .xls roster
        file: PathBuf,
    },
    /// Ingest a roster file into the daemon without sending
    Push {
        /// Path to a .csv, .xlsx, or .xls roster
        file: PathBuf,
        /// Ship the payload inline instead of through the spool
        #[arg(long)]
        inline: bool,
    },
    /// Check a roster file locally and preview the contacts
    Validate {
        /// Path to a .csv, .xlsx, or .xls roster
        file: PathBuf,
    },
    /// Show the message history log
    History {
        /// Number of entries to show, newest first
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Probe daemon readiness
    Status,
}

#[derive(Debug, Subcommand)]
pub enum GatewayAction {
    /// Run the gateway in the foreground
    Run {
        /// WebSocket listen URL (ws://host:port) — defaults to the
        /// configured gateway_url
        #[arg(long, value_name = "WS_URL")]
        listen: Option<String>,
        /// Run the browser headless
        #[arg(long)]
        headless: bool,
    },
    /// Start the gateway as a detached background process
    Start,
    /// Stop the background gateway
    Stop,
    /// Show background gateway status
    Status,
}
