//! Service hosting: PID file, signal handling and the foreground run loop.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::app::{AppContext, DealwatchError, Result};
use crate::config::format_interval;

const APP_DIR: &str = "dealwatch";

/// Location of the PID file of a running service.
pub fn pid_file_path() -> Option<PathBuf> {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .map(|d| d.join(APP_DIR).join("daemon.pid"))
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path()?;
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// PID of a live service, if there is one.
pub fn running_pid() -> Option<u32> {
    read_pid().filter(|&pid| process_exists(pid))
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use std::process::Command;
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(windows)]
fn process_exists(pid: u32) -> bool {
    use std::process::Command;
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid)])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

fn write_pid_file() -> std::io::Result<()> {
    if let Some(pid_path) = pid_file_path() {
        if let Some(parent) = pid_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&pid_path)?;
        writeln!(file, "{}", std::process::id())?;
    }
    Ok(())
}

fn remove_pid_file() {
    if let Some(pid_path) = pid_file_path() {
        let _ = fs::remove_file(pid_path);
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
pub fn install_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT, shutting down"),
                        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                        _ = token.cancelled() => return,
                    }
                }
                Err(e) => {
                    error!(error = %e, "cannot install SIGTERM handler");
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT, shutting down"),
                        _ = token.cancelled() => return,
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = ctrl_c => info!("received Ctrl+C, shutting down"),
                _ = token.cancelled() => return,
            }
        }

        token.cancel();
        debug!("signal handler done");
    });
}

/// Runs the crawler in the foreground until a stop signal arrives.
pub struct Daemon {
    ctx: AppContext,
}

impl Daemon {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) -> Result<()> {
        if let Some(pid) = running_pid() {
            return Err(DealwatchError::Other(format!(
                "another instance is already running (PID {})",
                pid
            )));
        }

        write_pid_file()?;
        install_signal_handler(self.ctx.cancel.clone());

        let result = self.serve().await;

        self.ctx.shutdown().await;
        remove_pid_file();
        info!("dealwatch stopped");
        result
    }

    async fn serve(&self) -> Result<()> {
        let queue = self.ctx.open_queue()?;
        let mut scheduler = self.ctx.scheduler(queue.clone());

        info!(
            pid = std::process::id(),
            interval = %format_interval(self.ctx.config.crawler.poll_interval()),
            forum = %self.ctx.forum().urls().listing_url(),
            "dealwatch started"
        );

        scheduler.run().await;
        queue.shutdown().await;
        Ok(())
    }
}

/// Ask a running service to stop. Returns its PID.
pub fn stop_daemon() -> Result<u32> {
    let pid = read_pid()
        .ok_or_else(|| DealwatchError::Other("no service is running (PID file not found)".into()))?;

    #[cfg(unix)]
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()?;

    #[cfg(windows)]
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status()?;

    if status.success() {
        remove_pid_file();
        Ok(pid)
    } else {
        Err(DealwatchError::Other(format!("failed to stop service (PID {})", pid)))
    }
}

pub fn daemon_status() -> String {
    match read_pid() {
        Some(pid) if process_exists(pid) => format!("dealwatch is running (PID: {})", pid),
        Some(_) => "dealwatch is not running (stale PID file)".to_string(),
        None => "dealwatch is not running".to_string(),
    }
}
