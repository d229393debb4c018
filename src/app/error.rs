use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DealwatchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} for {url}")]
    Classification { url: String, status: u16 },

    #[error("Remote reported not found: {0}")]
    RemoteNotFound(String),

    #[error("Bypass transport error: {0}")]
    Bypass(String),

    #[error("Corrupt queue entry {}: {message}", path.display())]
    CorruptQueueEntry { path: PathBuf, message: String },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Thread {id} failed: {source}")]
    Thread {
        id: i64,
        source: Box<DealwatchError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl DealwatchError {
    /// Stable name of the error variant, used to group repeated failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Classification { .. } => "classification",
            Self::RemoteNotFound(_) => "remote_not_found",
            Self::Bypass(_) => "bypass",
            Self::CorruptQueueEntry { .. } => "corrupt_queue_entry",
            Self::Delivery(_) => "delivery",
            Self::Validation(_) => "validation",
            Self::Image(_) => "image",
            Self::Json(_) => "json",
            Self::InvalidUrl(_) => "invalid_url",
            Self::Io(_) => "io",
            Self::Config(_) => "config",
            Self::Thread { source, .. } => source.kind(),
            Self::Cancelled => "cancelled",
            Self::Other(_) => "other",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Thread { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Wrap a failure that happened while processing a single thread.
    pub fn in_thread(self, id: i64) -> Self {
        match self {
            Self::Cancelled => Self::Cancelled,
            other => Self::Thread {
                id,
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, DealwatchError>;
