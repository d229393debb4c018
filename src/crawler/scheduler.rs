use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::{DealwatchError, Result};
use crate::config::CrawlerConfig;
use crate::crawler::FailureTracker;
use crate::domain::{ParseMode, PromoRecord, ThreadPage};
use crate::extractor::PromoExtractor;
use crate::forum::ForumClient;
use crate::notify::{DeliveryQueue, NotificationFormatter};
use crate::store::PersistentCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Re-read the listing, backfill missed ids and resync the cursor.
    Full,
    /// Probe ids one by one starting at the cursor.
    Incremental,
}

/// The crawl loop: decides how to scan, drives the forum client and the
/// extractor, and hands finished records to the delivery queue.
pub struct CrawlScheduler {
    forum: ForumClient,
    extractor: PromoExtractor,
    formatter: NotificationFormatter,
    queue: DeliveryQueue,
    cursor: PersistentCursor,
    failures: FailureTracker,
    last_update: Option<Instant>,
    poll_interval: Duration,
    full_scan_interval: Duration,
    cancel: CancellationToken,
}

impl CrawlScheduler {
    pub fn new(
        config: &CrawlerConfig,
        forum: ForumClient,
        extractor: PromoExtractor,
        queue: DeliveryQueue,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            forum,
            extractor,
            formatter: NotificationFormatter::new(),
            queue,
            cursor: PersistentCursor::load(&config.state_file),
            failures: FailureTracker::new(config.tries_before_log),
            last_update: None,
            poll_interval: config.poll_interval(),
            full_scan_interval: config.full_scan_interval,
            cancel,
        }
    }

    pub fn cursor(&self) -> i64 {
        self.cursor.value()
    }

    pub fn scan_mode(&self, now: Instant) -> ScanMode {
        let stale = match self.last_update {
            Some(at) => now.saturating_duration_since(at) > self.full_scan_interval,
            None => true,
        };
        if self.cursor.value() <= 0 || stale {
            ScanMode::Full
        } else {
            ScanMode::Incremental
        }
    }

    /// Cycle until cancelled, sleeping between cycles.
    pub async fn run(&mut self) {
        info!(cursor = self.cursor.value(), "crawler started");

        while !self.cancel.is_cancelled() {
            self.tick().await;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.checkpoint();
        info!(cursor = self.cursor.value(), "crawler stopped");
    }

    /// One cycle plus failure accounting and a cursor checkpoint.
    pub async fn tick(&mut self) {
        match self.run_cycle().await {
            Ok(()) => self.failures.reset(),
            Err(e) if e.is_cancelled() => debug!("cycle interrupted by shutdown"),
            Err(e) => self.on_failure(e).await,
        }
        self.checkpoint();
    }

    pub async fn run_cycle(&mut self) -> Result<()> {
        match self.scan_mode(Instant::now()) {
            ScanMode::Full => self.full_scan().await,
            ScanMode::Incremental => self.incremental_scan().await,
        }
    }

    async fn full_scan(&mut self) -> Result<()> {
        let listed = self.forum.thread_ids().await?;
        let Some(max) = listed.iter().copied().max() else {
            warn!(url = %self.forum.urls().listing_url(), "listing has no threads");
            return Ok(());
        };

        let cursor = self.cursor.value();
        if cursor > 0 && max >= cursor {
            let mut missed: Vec<i64> = listed
                .iter()
                .copied()
                .filter(|id| (cursor..=max).contains(id))
                .collect();
            missed.sort_unstable();
            info!(from = cursor, to = max, count = missed.len(), "full scan");

            for id in missed {
                self.ensure_active()?;
                self.process_listed(id).await.map_err(|e| e.in_thread(id))?;
                self.cursor.advance_to(id + 1);
            }
        } else {
            debug!(cursor, max, "full scan resynchronizes cursor");
        }

        self.cursor.advance_to(max + 1);
        self.last_update = Some(Instant::now());
        Ok(())
    }

    async fn incremental_scan(&mut self) -> Result<()> {
        loop {
            self.ensure_active()?;
            let id = self.cursor.value();

            match self.forum.classify(id).await.map_err(|e| e.in_thread(id))? {
                ThreadPage::NotFound => {
                    debug!(id, "no such thread yet");
                    return Ok(());
                }
                ThreadPage::Private => debug!(id, "skipping private thread"),
                ThreadPage::Public { body } => {
                    let url = self.forum.urls().thread_url(id);
                    if let Some(record) = self.extractor.extract(&body, id, &url).await {
                        let listed = self.forum.thread_ids().await.map_err(|e| e.in_thread(id))?;
                        if listed.contains(&id) {
                            self.deliver(&record).await.map_err(|e| e.in_thread(id))?;
                            self.last_update = Some(Instant::now());
                        } else {
                            debug!(id, "thread is not in the promotions forum");
                        }
                    }
                }
            }

            self.cursor.advance_to(id + 1);
        }
    }

    /// Handle an id already known to be on the listing.
    async fn process_listed(&mut self, id: i64) -> Result<()> {
        let ThreadPage::Public { body } = self.forum.classify(id).await? else {
            debug!(id, "listed thread is not public");
            return Ok(());
        };

        let url = self.forum.urls().thread_url(id);
        match self.extractor.extract(&body, id, &url).await {
            Some(record) => self.deliver(&record).await,
            None => {
                debug!(id, "thread has no title, skipping");
                Ok(())
            }
        }
    }

    async fn deliver(&self, record: &PromoRecord) -> Result<()> {
        info!(id = record.id, title = %record.title, "new promotion");
        self.queue.send(self.formatter.format(record)).await
    }

    async fn on_failure(&mut self, e: DealwatchError) {
        let report = self.failures.record(&e);
        if report.log {
            error!(consecutive = report.consecutive, kind = e.kind(), error = %e, "crawl cycle failed");
        } else {
            debug!(consecutive = report.consecutive, error = %e, "crawl cycle failed again");
        }

        if report.escalate {
            if let Err(send_err) = self.queue.send_message(escalation_text(&e), ParseMode::Html).await {
                error!(error = %send_err, "cannot report crawl failure");
            }
        }
    }

    /// Save the cursor if it moved, logging instead of failing.
    pub fn checkpoint(&mut self) {
        if let Err(e) = self.cursor.checkpoint() {
            error!(path = %self.cursor.path().display(), error = %e, "cannot save cursor");
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(DealwatchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn escalation_text(e: &DealwatchError) -> String {
    format!(
        "<b>Server exception</b>\n<b>Message:</b> {}\n<b>Type:</b> {}",
        html_escape::encode_text(&e.to_string()),
        e.kind()
    )
}
