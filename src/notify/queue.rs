use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::{DealwatchError, Result};
use crate::config::TelegramConfig;
use crate::domain::{OutboundMessage, ParseMode};
use crate::notify::MessageSender;
use crate::store::QueueDirectory;

enum WorkerSlot {
    Idle(mpsc::UnboundedReceiver<PathBuf>),
    Running(JoinHandle<()>),
    Stopped,
}

struct QueueInner {
    sender: Arc<dyn MessageSender>,
    store: QueueDirectory,
    chat_id: i64,
    retry_interval: Duration,
    degrade_after: u32,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<PathBuf>,
    started: AtomicBool,
    worker: Mutex<WorkerSlot>,
}

impl QueueInner {
    async fn attempt(&self, message: &OutboundMessage) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DealwatchError::Cancelled),
            result = self.sender.send(message) => result,
        }
    }
}

/// Durable, at-least-once outbound message queue.
///
/// Every message gets one immediate delivery attempt. A failed message is
/// written to the queue directory and handed to a single background worker
/// that retries the oldest entry until it goes through, so later entries
/// wait behind it. A photo that keeps failing is rewritten as text.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

impl DeliveryQueue {
    /// Create the queue and pick up entries left over by a previous run.
    pub fn open(
        config: &TelegramConfig,
        sender: Arc<dyn MessageSender>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            inner: Arc::new(QueueInner {
                sender,
                store: QueueDirectory::new(&config.queue_dir),
                chat_id: config.chat,
                retry_interval: config.retry_interval,
                degrade_after: config.photo_tries,
                cancel: cancel.child_token(),
                tx,
                started: AtomicBool::new(false),
                worker: Mutex::new(WorkerSlot::Idle(rx)),
            }),
        };

        let pending = queue.inner.store.pending()?;
        if !pending.is_empty() {
            info!(count = pending.len(), "reloading undelivered messages");
            for path in pending {
                queue.enqueue(path);
            }
            queue.ensure_worker();
        }

        Ok(queue)
    }

    pub async fn send_message(&self, text: impl Into<String>, parse_mode: ParseMode) -> Result<()> {
        self.send(OutboundMessage::text(text, parse_mode)).await
    }

    pub async fn send_photo(
        &self,
        photo: impl Into<String>,
        caption: Option<String>,
        parse_mode: ParseMode,
    ) -> Result<()> {
        self.send(OutboundMessage::photo(photo, caption, parse_mode))
            .await
    }

    /// Deliver now or queue for retry.
    ///
    /// Only malformed messages and failures to persist a queue entry are
    /// returned as errors.
    pub async fn send(&self, message: OutboundMessage) -> Result<()> {
        message.validate()?;
        let message = message.with_chat_id(self.inner.chat_id);

        match self.inner.attempt(&message).await {
            Ok(()) => return Ok(()),
            Err(DealwatchError::Cancelled) => debug!("shutting down, queueing message"),
            Err(e) => warn!(error = %e, "delivery failed, queueing message"),
        }

        let path = self.inner.store.write(&message)?;
        self.enqueue(path);
        self.ensure_worker();
        Ok(())
    }

    /// Files still waiting for delivery, in delivery order.
    pub fn pending_files(&self) -> Result<Vec<PathBuf>> {
        self.inner.store.pending()
    }

    /// Stop the worker and wait for it. Undelivered entries stay on disk.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let slot = {
            let mut guard = self
                .inner
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, WorkerSlot::Stopped)
        };

        if let WorkerSlot::Running(handle) = slot {
            if let Err(e) = handle.await {
                error!(error = %e, "delivery worker panicked");
            }
        }
    }

    fn enqueue(&self, path: PathBuf) {
        if self.inner.tx.send(path).is_err() {
            warn!("delivery worker is gone, entry stays on disk");
        }
    }

    fn ensure_worker(&self) {
        if self.inner.started.load(Ordering::Acquire) {
            return;
        }

        let mut guard = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !matches!(*guard, WorkerSlot::Idle(_)) {
            return;
        }
        if let WorkerSlot::Idle(rx) = std::mem::replace(&mut *guard, WorkerSlot::Stopped) {
            let worker = Worker {
                inner: self.inner.clone(),
                rx,
            };
            *guard = WorkerSlot::Running(tokio::spawn(worker.run()));
            self.inner.started.store(true, Ordering::Release);
        }
    }
}

struct Worker {
    inner: Arc<QueueInner>,
    rx: mpsc::UnboundedReceiver<PathBuf>,
}

impl Worker {
    async fn run(mut self) {
        info!("delivery worker started");

        loop {
            let path = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(path) => path,
                    None => break,
                },
            };

            self.deliver(&path).await;
        }

        info!("delivery worker stopped");
    }

    /// Retry one entry until it is delivered or the queue shuts down.
    async fn deliver(&self, path: &Path) {
        let store = &self.inner.store;

        let mut message = match store.load(path).and_then(|m| self.checked(m)) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(path = %path.display(), "queue entry already gone");
                return;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "dropping unreadable queue entry");
                if let Err(e) = store.remove(path) {
                    error!(path = %path.display(), error = %e, "cannot remove queue entry");
                }
                return;
            }
        };

        let mut failures: u32 = 0;
        loop {
            match self.inner.attempt(&message).await {
                Ok(()) => {
                    if let Err(e) = store.remove(path) {
                        error!(path = %path.display(), error = %e, "delivered but cannot remove queue entry");
                    }
                    debug!(path = %path.display(), "queued message delivered");
                    return;
                }
                Err(DealwatchError::Cancelled) => return,
                Err(e) => {
                    failures += 1;
                    warn!(path = %path.display(), failures, error = %e, "queued delivery failed");

                    let degrade_after = self.inner.degrade_after;
                    if message.is_photo() && degrade_after > 0 && failures % degrade_after == 0 {
                        message = message.degrade();
                        info!(path = %path.display(), "photo keeps failing, sending as text");
                        if let Err(e) = store.rewrite(path, &message) {
                            error!(path = %path.display(), error = %e, "cannot rewrite queue entry");
                        }
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.inner.retry_interval) => {}
            }
        }
    }

    /// Reject entries that can never be delivered and route the rest to
    /// the configured chat.
    fn checked(&self, message: Option<OutboundMessage>) -> Result<Option<OutboundMessage>> {
        let Some(message) = message else {
            return Ok(None);
        };
        message.validate()?;
        Ok(Some(message.with_chat_id(self.inner.chat_id)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;

    /// Fails the first `fail_first` attempts, and every photo when
    /// `reject_photos` is set.
    #[derive(Default)]
    struct ScriptedSender {
        fail_first: usize,
        reject_photos: bool,
        attempts: AtomicUsize,
        delivered: Mutex<Vec<OutboundMessage>>,
    }

    impl ScriptedSender {
        fn delivered(&self) -> Vec<OutboundMessage> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSender for ScriptedSender {
        async fn send(&self, message: &OutboundMessage) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first || (self.reject_photos && message.is_photo()) {
                return Err(DealwatchError::Delivery("scripted failure".into()));
            }
            self.delivered.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn config(dir: &TempDir) -> TelegramConfig {
        TelegramConfig {
            token: "t".into(),
            chat: 42,
            queue_dir: dir.path().join("queue"),
            retry_interval: Duration::from_millis(10),
            photo_tries: 2,
            ..TelegramConfig::default()
        }
    }

    fn open(dir: &TempDir, sender: &Arc<ScriptedSender>) -> DeliveryQueue {
        DeliveryQueue::open(&config(dir), sender.clone(), &CancellationToken::new()).unwrap()
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_immediate_delivery_leaves_no_files() {
        let dir = TempDir::new().unwrap();
        let sender = Arc::new(ScriptedSender::default());
        let queue = open(&dir, &sender);

        queue.send_message("hello", ParseMode::Html).await.unwrap();

        assert!(queue.pending_files().unwrap().is_empty());
        let delivered = sender.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].chat_id(), Some(42));
    }

    #[tokio::test]
    async fn test_failed_send_is_persisted_then_retried() {
        let dir = TempDir::new().unwrap();
        let sender = Arc::new(ScriptedSender {
            fail_first: 2,
            ..Default::default()
        });
        let queue = open(&dir, &sender);

        queue.send_message("retry me", ParseMode::Text).await.unwrap();
        assert_eq!(queue.pending_files().unwrap().len(), 1);

        wait_until(|| sender.delivered().len() == 1).await;
        wait_until(|| queue.pending_files().unwrap().is_empty()).await;
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 3);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_photo_degrades_to_caption_text() {
        let dir = TempDir::new().unwrap();
        let sender = Arc::new(ScriptedSender {
            reject_photos: true,
            ..Default::default()
        });
        let queue = open(&dir, &sender);

        queue
            .send_photo("https://img.test/p.jpg", Some("<b>Deal</b>".into()), ParseMode::Html)
            .await
            .unwrap();

        wait_until(|| sender.delivered().len() == 1).await;
        match &sender.delivered()[0] {
            OutboundMessage::Text(m) => {
                assert_eq!(m.text, "<b>Deal</b>");
                assert_eq!(m.parse_mode, ParseMode::Html);
                assert!(m.disable_web_page_preview);
            }
            other => panic!("expected text, got {:?}", other),
        }
        // one immediate attempt, then two queued photo attempts before degrading
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 4);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_leftover_entries_are_delivered_in_order() {
        let dir = TempDir::new().unwrap();
        let store = QueueDirectory::new(dir.path().join("queue"));
        let first = store.write(&OutboundMessage::text("first", ParseMode::Text)).unwrap();
        let second = store.write(&OutboundMessage::text("second", ParseMode::Text)).unwrap();
        let base = std::time::SystemTime::now() - Duration::from_secs(10);
        for (i, path) in [&first, &second].into_iter().enumerate() {
            std::fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(base + Duration::from_secs(i as u64))
                .unwrap();
        }
        std::fs::write(store.root().join("junk.json"), "not json").unwrap();

        let sender = Arc::new(ScriptedSender::default());
        let queue = open(&dir, &sender);

        wait_until(|| sender.delivered().len() == 2).await;
        wait_until(|| queue.pending_files().unwrap().is_empty()).await;

        let texts: Vec<String> = sender
            .delivered()
            .into_iter()
            .map(|m| match m {
                OutboundMessage::Text(t) => {
                    assert_eq!(t.chat_id, Some(42));
                    t.text
                }
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_leftover_entries_follow_configured_chat() {
        let dir = TempDir::new().unwrap();
        let store = QueueDirectory::new(dir.path().join("queue"));
        store
            .write(&OutboundMessage::text("old chat", ParseMode::Text).with_chat_id(7))
            .unwrap();

        let sender = Arc::new(ScriptedSender::default());
        let queue = open(&dir, &sender);

        wait_until(|| sender.delivered().len() == 1).await;
        assert_eq!(sender.delivered()[0].chat_id(), Some(42));

        queue
            .send(OutboundMessage::text("explicit", ParseMode::Text).with_chat_id(7))
            .await
            .unwrap();
        assert_eq!(sender.delivered()[1].chat_id(), Some(42));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_degraded_head_keeps_its_place_after_restart() {
        let dir = TempDir::new().unwrap();
        let store = QueueDirectory::new(dir.path().join("queue"));
        let photo = store
            .write(&OutboundMessage::photo(
                "https://img.test/p.jpg",
                Some("caption".into()),
                ParseMode::Html,
            ))
            .unwrap();
        let text = store
            .write(&OutboundMessage::text("queued later", ParseMode::Text))
            .unwrap();
        let base = std::time::SystemTime::now() - Duration::from_secs(10);
        for (i, path) in [&photo, &text].into_iter().enumerate() {
            std::fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(base + Duration::from_secs(i as u64))
                .unwrap();
        }

        let sender = Arc::new(ScriptedSender {
            fail_first: usize::MAX,
            ..Default::default()
        });
        let queue = open(&dir, &sender);

        // photo_tries is 2, so the entry is rewritten as text before the third attempt
        wait_until(|| sender.attempts.load(Ordering::SeqCst) >= 3).await;
        queue.shutdown().await;

        assert_eq!(store.pending().unwrap(), vec![photo.clone(), text]);
        assert!(!store.load(&photo).unwrap().unwrap().is_photo());
    }

    #[tokio::test]
    async fn test_invalid_message_fails_fast() {
        let dir = TempDir::new().unwrap();
        let sender = Arc::new(ScriptedSender::default());
        let queue = open(&dir, &sender);

        let err = queue.send_message("   ", ParseMode::Text).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = queue
            .send_photo("relative/p.png", None, ParseMode::Text)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        assert_eq!(sender.attempts.load(Ordering::SeqCst), 0);
        assert!(queue.pending_files().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_keeps_undelivered_entries() {
        let dir = TempDir::new().unwrap();
        let sender = Arc::new(ScriptedSender {
            fail_first: usize::MAX,
            ..Default::default()
        });
        let queue = open(&dir, &sender);

        queue.send_message("stuck", ParseMode::Text).await.unwrap();
        wait_until(|| sender.attempts.load(Ordering::SeqCst) >= 2).await;
        queue.shutdown().await;

        assert_eq!(queue.pending_files().unwrap().len(), 1);

        queue.send_message("after", ParseMode::Text).await.unwrap();
        assert_eq!(queue.pending_files().unwrap().len(), 2);
    }
}
