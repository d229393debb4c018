pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(name = "dealwatch")]
#[command(about = "Relays new forum promotions to a Telegram channel", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the crawler in the foreground until stopped
    Run {
        /// Poll interval override (e.g., "15s", "1m")
        #[arg(short, long)]
        interval: Option<String>,

        /// Log file path (default: stderr)
        #[arg(short, long)]
        log: Option<PathBuf>,
    },
    /// Run a single crawl cycle and exit
    Once,
    /// Stop the running service
    Stop,
    /// Check whether the service is running
    Status,
    /// Fetch one thread and print what would be extracted from it
    Extract {
        /// Thread id
        id: i64,
    },
    /// List messages waiting for delivery
    Queue,
}
