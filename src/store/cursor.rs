use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::Result;

#[derive(Serialize, Deserialize)]
struct CursorFile {
    nextthread: i64,
}

/// The next unseen thread id, backed by a small JSON state file.
///
/// The value never decreases and is only written when it differs from what
/// is already on disk.
#[derive(Debug)]
pub struct PersistentCursor {
    path: PathBuf,
    value: i64,
    persisted: i64,
}

impl PersistentCursor {
    /// Read the cursor from `path`. A missing or unreadable file yields zero.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let value = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<CursorFile>(&raw) {
                Ok(file) => file.nextthread,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt cursor file, starting from zero");
                    0
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read cursor file, starting from zero");
                0
            }
        };

        debug!(path = %path.display(), value, "loaded cursor");
        Self {
            path,
            value,
            persisted: value,
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the cursor forward to `next`. Smaller values are ignored.
    pub fn advance_to(&mut self, next: i64) {
        self.value = self.value.max(next);
    }

    pub fn is_dirty(&self) -> bool {
        self.value != self.persisted
    }

    /// Persist the value if it changed. Returns whether a write happened.
    pub fn checkpoint(&mut self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let body = serde_json::to_string(&CursorFile {
            nextthread: self.value,
        })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;

        self.persisted = self.value;
        debug!(value = self.value, "cursor saved");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_missing_file_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let cursor = PersistentCursor::load(dir.path().join("state.json"));
        assert_eq!(cursor.value(), 0);
        assert!(!cursor.is_dirty());
    }

    #[test]
    fn test_corrupt_file_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        assert_eq!(PersistentCursor::load(&path).value(), 0);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut cursor = PersistentCursor::load(&path);
        for value in [5, 17, 42] {
            cursor.advance_to(value);
            assert!(cursor.checkpoint().unwrap());
            assert_eq!(PersistentCursor::load(&path).value(), value);
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"nextthread":42}"#);
    }

    #[test]
    fn test_never_decreases() {
        let dir = TempDir::new().unwrap();
        let mut cursor = PersistentCursor::load(dir.path().join("state.json"));
        cursor.advance_to(10);
        cursor.advance_to(3);
        assert_eq!(cursor.value(), 10);
    }

    #[test]
    fn test_checkpoint_skips_unchanged_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut cursor = PersistentCursor::load(&path);

        assert!(!cursor.checkpoint().unwrap());
        assert!(!path.exists());

        cursor.advance_to(8);
        assert!(cursor.checkpoint().unwrap());
        std::fs::remove_file(&path).unwrap();

        cursor.advance_to(8);
        assert!(!cursor.checkpoint().unwrap());
        assert!(!path.exists());
    }
}
