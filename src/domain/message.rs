use serde::{Deserialize, Serialize};

use crate::app::{DealwatchError, Result};
use crate::extractor::markup::is_full_url;

/// Formatting mode understood by the messaging API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[default]
    Text,
    Html,
    MarkdownV2,
}

impl ParseMode {
    /// Value of the `parse_mode` field on the wire. Plain text omits it.
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            Self::Text => None,
            Self::Html => Some("HTML"),
            Self::MarkdownV2 => Some("MarkdownV2"),
        }
    }
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    pub text: String,
    #[serde(default)]
    pub parse_mode: ParseMode,
    #[serde(default = "enabled")]
    pub disable_web_page_preview: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    /// Absolute URL of the image.
    pub photo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default)]
    pub parse_mode: ParseMode,
}

/// A message waiting to be delivered. This is also the on-disk format of a
/// queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text(TextMessage),
    Photo(PhotoMessage),
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>, parse_mode: ParseMode) -> Self {
        Self::Text(TextMessage {
            chat_id: None,
            text: text.into(),
            parse_mode,
            disable_web_page_preview: true,
        })
    }

    pub fn photo(photo: impl Into<String>, caption: Option<String>, parse_mode: ParseMode) -> Self {
        Self::Photo(PhotoMessage {
            chat_id: None,
            photo: photo.into(),
            caption,
            parse_mode,
        })
    }

    /// Reject payloads the API would never accept.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Text(m) if m.text.trim().is_empty() => {
                Err(DealwatchError::Validation("message text is empty".into()))
            }
            Self::Photo(m) if !is_full_url(&m.photo) => Err(DealwatchError::Validation(format!(
                "photo must be an absolute URL, got {:?}",
                m.photo
            ))),
            _ => Ok(()),
        }
    }

    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Self::Text(m) => m.chat_id,
            Self::Photo(m) => m.chat_id,
        }
    }

    pub fn with_chat_id(mut self, chat_id: i64) -> Self {
        match &mut self {
            Self::Text(m) => m.chat_id = Some(chat_id),
            Self::Photo(m) => m.chat_id = Some(chat_id),
        }
        self
    }

    pub fn is_photo(&self) -> bool {
        matches!(self, Self::Photo(_))
    }

    /// Turn a photo into a plain text message carrying its caption.
    ///
    /// A photo without caption becomes its own URL as plain text. Text
    /// messages are returned unchanged.
    pub fn degrade(self) -> Self {
        match self {
            Self::Photo(m) => {
                let (text, parse_mode) = match m.caption {
                    Some(caption) if !caption.trim().is_empty() => (caption, m.parse_mode),
                    _ => (m.photo, ParseMode::Text),
                };
                Self::Text(TextMessage {
                    chat_id: m.chat_id,
                    text,
                    parse_mode,
                    disable_web_page_preview: true,
                })
            }
            text => text,
        }
    }
}
