use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use likers_core::{Checkpoint, Cursor, ErrorClass, LikerProfile, PageSize, PostId, RateWindow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub post_id: PostId,
    /// `None` requests the first page.
    pub cursor: Option<Cursor>,
    pub page_size: PageSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikesPage {
    pub users: Vec<LikerProfile>,
    /// `None` on the last page.
    pub next_cursor: Option<Cursor>,
    /// `None` when the response carried no rate-limit headers.
    pub rate: Option<RateWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}{}", detail(.message))]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

fn detail(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {message}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientCause {
    Timeout,
    Network,
    HttpStatus(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Credentials rejected or not permitted to read this post.
    Auth { status: u16 },
    NotFound,
    RateLimited { reset_at: Option<DateTime<Utc>> },
    Transient(TransientCause),
    /// Any other client error; retrying the same request cannot succeed.
    Rejected { status: u16 },
    /// The body could not be decoded.
    Malformed,
}

impl ApiErrorKind {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiErrorKind::RateLimited { .. } => ErrorClass::RateLimited,
            ApiErrorKind::Transient(_) | ApiErrorKind::Malformed => ErrorClass::Transient,
            ApiErrorKind::Auth { .. } | ApiErrorKind::NotFound | ApiErrorKind::Rejected { .. } => {
                ErrorClass::Fatal
            }
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorKind::Auth { status } => write!(f, "authorization failed (http {status})"),
            ApiErrorKind::NotFound => write!(f, "post not found"),
            ApiErrorKind::RateLimited {
                reset_at: Some(reset_at),
            } => write!(f, "rate limited until {reset_at}"),
            ApiErrorKind::RateLimited { reset_at: None } => write!(f, "rate limited"),
            ApiErrorKind::Transient(TransientCause::Timeout) => write!(f, "timeout"),
            ApiErrorKind::Transient(TransientCause::Network) => write!(f, "network error"),
            ApiErrorKind::Transient(TransientCause::HttpStatus(code)) => {
                write!(f, "server error (http {code})")
            }
            ApiErrorKind::Rejected { status } => write!(f, "request rejected (http {status})"),
            ApiErrorKind::Malformed => write!(f, "malformed response body"),
        }
    }
}

/// Progress published while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerEvent {
    Resumed {
        checkpoint: Checkpoint,
    },
    AlreadyComplete {
        post_id: PostId,
        total_users_found: u64,
    },
    PageRequested {
        page: u32,
        cursor: Option<Cursor>,
        attempt: u32,
    },
    PageCommitted {
        page: u32,
        received: usize,
        inserted: u64,
        total_users_found: u64,
        done: bool,
    },
    RateLimitWait {
        until: DateTime<Utc>,
        remaining: Duration,
    },
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    ExportWritten {
        path: PathBuf,
        rows: u64,
    },
    ExportFailed {
        reason: String,
    },
}
