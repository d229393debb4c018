//! Outbound notifications: formatting, the messaging API client and the
//! durable delivery queue in front of it.

mod format;
mod photo;
mod queue;
mod telegram;

pub use format::{NotificationFormatter, MAX_CAPTION_LEN, MAX_TEXT_LEN};
pub use photo::{PhotoTranscoder, PreparedPhoto, MAX_PHOTO_BYTES, MAX_PHOTO_DIMENSION};
pub use queue::DeliveryQueue;
pub use telegram::TelegramClient;

use async_trait::async_trait;

use crate::app::Result;
use crate::domain::OutboundMessage;

/// Something that can deliver one message, once.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}
