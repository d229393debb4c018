use chrono::{DateTime, Local};

use crate::app::{AppContext, DealwatchError, Result};
use crate::config::{parse_interval, Config};
use crate::daemon::Daemon;
use crate::domain::{OutboundMessage, ThreadPage};
use crate::store::QueueDirectory;

pub async fn run(mut config: Config, interval: Option<&str>) -> Result<()> {
    if let Some(interval) = interval {
        config.crawler.poll_interval = parse_interval(interval).map_err(DealwatchError::Config)?;
    }

    Daemon::new(AppContext::new(config)?).run().await
}

pub async fn run_once(config: Config) -> Result<()> {
    let ctx = AppContext::new(config)?;
    let queue = ctx.open_queue()?;
    let mut scheduler = ctx.scheduler(queue.clone());

    let result = scheduler.run_cycle().await;
    scheduler.checkpoint();
    println!("Next thread: {}", scheduler.cursor());

    let pending = queue.pending_files()?.len();
    if pending > 0 {
        println!("{} message(s) queued for later delivery", pending);
    }

    queue.shutdown().await;
    ctx.shutdown().await;
    result
}

pub async fn extract(config: Config, id: i64) -> Result<()> {
    let ctx = AppContext::new(config)?;
    let forum = ctx.forum();
    let url = forum.urls().thread_url(id);

    let result = match forum.classify(id).await {
        Ok(ThreadPage::Public { body }) => match ctx.extractor().extract(&body, id, &url).await {
            Some(record) => {
                println!("{}", serde_json::to_string_pretty(&record)?);
                Ok(())
            }
            None => {
                println!("Thread {} has no title", id);
                Ok(())
            }
        },
        Ok(page) => {
            println!("Thread {} is {}", id, page.status());
            Ok(())
        }
        Err(e) => Err(e),
    };

    ctx.shutdown().await;
    result
}

pub fn list_queue(config: &Config) -> Result<()> {
    let queue = QueueDirectory::new(&config.telegram.queue_dir);
    let pending = queue.pending()?;

    if pending.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    for path in pending {
        let queued_at = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| "-".to_string());
        match queue.load(&path) {
            Ok(Some(OutboundMessage::Text(m))) => println!("{}  text   {}", queued_at, preview(&m.text)),
            Ok(Some(OutboundMessage::Photo(m))) => println!("{}  photo  {}", queued_at, m.photo),
            Ok(None) => {}
            Err(e) => println!("{}  error  {}", queued_at, e),
        }
    }

    Ok(())
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 60 {
        format!("{}...", line.chars().take(60).collect::<String>())
    } else {
        line.to_string()
    }
}
