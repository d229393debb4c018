use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dealwatch::cli::{commands, Cli, Commands};
use dealwatch::config::Config;
use dealwatch::daemon;

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dealwatch=info"));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Run { log, .. } => log.clone(),
        _ => None,
    };
    init_tracing(log_file.as_deref())?;

    match cli.command {
        Commands::Run { interval, .. } => {
            let config = Config::load(&cli.config)?;
            commands::run(config, interval.as_deref()).await?;
        }
        Commands::Once => {
            let config = Config::load(&cli.config)?;
            commands::run_once(config).await?;
        }
        Commands::Stop => {
            let pid = daemon::stop_daemon()?;
            println!("Stopped dealwatch (PID {})", pid);
        }
        Commands::Status => {
            println!("{}", daemon::daemon_status());
        }
        Commands::Extract { id } => {
            let config = Config::load(&cli.config)?;
            commands::extract(config, id).await?;
        }
        Commands::Queue => {
            let config = Config::load(&cli.config)?;
            commands::list_queue(&config)?;
        }
    }

    Ok(())
}
