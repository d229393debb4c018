use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tracing::debug;
use uuid::Uuid;

use crate::app::{DealwatchError, Result};
use crate::domain::OutboundMessage;

/// Last stamp handed out by [`entry_stamp`].
static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Strictly increasing nanosecond stamp, so entry names sort in write order
/// even when two writes share a clock tick.
fn entry_stamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_STAMP.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Write `data` next to `path` and rename it into place.
///
/// Readers see either the old file or the complete new one. The temporary
/// file ends in `.tmp` and is never listed as pending.
fn write_atomic(path: &Path, data: &[u8], modified: Option<SystemTime>) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    if let Some(modified) = modified {
        file.set_modified(modified)?;
    }
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// On-disk home of undelivered messages: one JSON file per entry.
#[derive(Debug, Clone)]
pub struct QueueDirectory {
    root: PathBuf,
}

impl QueueDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a message under a fresh unique name.
    ///
    /// Names start with a write-order stamp, which breaks ties between
    /// entries with the same modification time.
    pub fn write(&self, message: &OutboundMessage) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join(format!(
            "{:020}-{}.json",
            entry_stamp(),
            Uuid::new_v4().simple()
        ));
        write_atomic(&path, &serde_json::to_vec(message)?, None)?;
        debug!(path = %path.display(), "queued message");
        Ok(path)
    }

    /// Replace the contents of an existing entry, keeping its place in line.
    pub fn rewrite(&self, path: &Path, message: &OutboundMessage) -> Result<()> {
        let modified = std::fs::metadata(path)?.modified().ok();
        write_atomic(path, &serde_json::to_vec(message)?, modified)
    }

    /// Load an entry. `Ok(None)` means the file is already gone.
    pub fn load(&self, path: &Path) -> Result<Option<OutboundMessage>> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| DealwatchError::CorruptQueueEntry {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Entries currently on disk, oldest modification time first, then by name.
    pub fn pending(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let modified = entry
                    .metadata()?
                    .modified()
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((modified, path));
            }
        }

        files.sort();
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}
