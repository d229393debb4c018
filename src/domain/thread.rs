use std::fmt;

use crate::app::{DealwatchError, Result};

/// Visibility of a forum thread as seen by an anonymous client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadStatus {
    Public,
    Private,
    NotFound,
}

impl ThreadStatus {
    /// Map an HTTP status code onto a thread status.
    ///
    /// Codes outside the known set are a classification error rather than
    /// a guess.
    pub fn from_http(url: &str, status: u16) -> Result<Self> {
        match status {
            200 => Ok(Self::Public),
            401..=403 => Ok(Self::Private),
            404 => Ok(Self::NotFound),
            _ => Err(DealwatchError::Classification {
                url: url.to_string(),
                status,
            }),
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

/// A classified thread page. Only public pages carry a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadPage {
    Public { body: String },
    Private,
    NotFound,
}

impl ThreadPage {
    pub fn status(&self) -> ThreadStatus {
        match self {
            Self::Public { .. } => ThreadStatus::Public,
            Self::Private => ThreadStatus::Private,
            Self::NotFound => ThreadStatus::NotFound,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Public { body } => Some(body),
            _ => None,
        }
    }
}
