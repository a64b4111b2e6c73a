use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Cursor, PostId};

/// Persisted resumption state for one post's fetch session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub post_id: PostId,
    /// `None` means the next request starts from the beginning.
    pub next_cursor: Option<Cursor>,
    pub done: bool,
    pub total_users_found: u64,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// State of a post that has never been fetched.
    pub fn fresh(post_id: PostId) -> Self {
        Self {
            post_id,
            next_cursor: None,
            done: false,
            total_users_found: 0,
            last_updated_at: None,
        }
    }

    /// Checkpoint after a fully processed page.
    ///
    /// A missing `next_cursor` marks the fetch as done.
    pub fn advance(&self, next_cursor: Option<Cursor>, inserted: u64, at: DateTime<Utc>) -> Self {
        Self {
            post_id: self.post_id.clone(),
            done: next_cursor.is_none(),
            next_cursor,
            total_users_found: self.total_users_found.saturating_add(inserted),
            last_updated_at: Some(at),
        }
    }

    /// Raise the running total to `stored_count` if the store holds more rows
    /// than the checkpoint accounts for. Never lowers the total.
    pub fn reconcile_total(&mut self, stored_count: u64) -> bool {
        if stored_count > self.total_users_found {
            self.total_users_found = stored_count;
            true
        } else {
            false
        }
    }
}

/// Profile of one liking account as returned by the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LikerProfile {
    pub user_id: String,
    pub username: String,
    pub name: Option<String>,
    pub verified: bool,
    pub created_at: Option<String>,
    pub description: Option<String>,
    /// Raw JSON object, stored verbatim.
    pub public_metrics: Option<String>,
}

impl LikerProfile {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn profile_url(&self) -> Option<String> {
        if self.username.is_empty() {
            None
        } else {
            Some(format!("https://x.com/{}", self.username))
        }
    }
}

/// Stored liker row, unique per `(post_id, profile.user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikerRecord {
    pub post_id: PostId,
    pub profile: LikerProfile,
    pub fetched_at: DateTime<Utc>,
}

/// Rate budget reported by one API response. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub remaining_calls: i64,
    pub reset_at: DateTime<Utc>,
}
