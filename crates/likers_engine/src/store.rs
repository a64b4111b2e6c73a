use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use likers_core::{Checkpoint, Cursor, LikerProfile, LikerRecord, PostId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("checkpoint for post {0} is complete and cannot move")]
    Sealed(PostId),
    #[error("corrupt value in column {column}: {value:?}")]
    Corrupt { column: &'static str, value: String },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable checkpoint and liker storage.
///
/// Only the pager writes checkpoints and likers. The exporter records when it
/// last wrote a snapshot; status never mutates anything.
pub trait Store: Send + Sync {
    /// Existing checkpoint, or a freshly created one for an unseen post.
    fn load_checkpoint(&self, post_id: &PostId) -> Result<Checkpoint, StoreError>;
    /// Read-only lookup; never creates a row.
    fn peek_checkpoint(&self, post_id: &PostId) -> Result<Option<Checkpoint>, StoreError>;
    fn checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError>;
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;
    /// Insert-or-ignore keyed by `(post_id, user_id)`; returns the number of
    /// rows that were new.
    fn record_likers(
        &self,
        post_id: &PostId,
        likers: &[LikerProfile],
        fetched_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
    fn count_likers(&self, post_id: &PostId) -> Result<u64, StoreError>;
    /// Every stored liker for the post, ordered by user id.
    fn likers(&self, post_id: &PostId) -> Result<Vec<LikerRecord>, StoreError>;
    /// Moves forward only; an older timestamp leaves the stored one in place.
    fn record_export(&self, post_id: &PostId, at: DateTime<Utc>) -> Result<(), StoreError>;
    fn last_export(&self, post_id: &PostId) -> Result<Option<DateTime<Utc>>, StoreError>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
  post_id TEXT PRIMARY KEY,
  next_cursor TEXT NULL,
  done INTEGER NOT NULL DEFAULT 0,
  total_users_found INTEGER NOT NULL DEFAULT 0,
  last_updated_at TEXT NULL
);

CREATE TABLE IF NOT EXISTS likers (
  post_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  username TEXT NOT NULL,
  name TEXT NULL,
  verified INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NULL,
  description TEXT NULL,
  public_metrics TEXT NULL,
  fetched_at TEXT NOT NULL,
  PRIMARY KEY(post_id, user_id)
);

CREATE TABLE IF NOT EXISTS exports (
  post_id TEXT PRIMARY KEY,
  last_export_at TEXT NOT NULL
);
"#;

const SELECT_CHECKPOINT: &str =
    "SELECT post_id, next_cursor, done, total_users_found, last_updated_at FROM checkpoints";

/// One connection behind a mutex. Whole-snapshot reads such as
/// [`Store::likers`] hold the lock until every row is loaded, so a large
/// export briefly blocks the pager's next write.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Store for SqliteStore {
    fn load_checkpoint(&self, post_id: &PostId) -> Result<Checkpoint, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO checkpoints (post_id, next_cursor, done, total_users_found, last_updated_at)
             VALUES (?1, NULL, 0, 0, NULL)",
            params![post_id.as_str()],
        )?;
        let raw = tx.query_row(
            &format!("{SELECT_CHECKPOINT} WHERE post_id = ?1"),
            params![post_id.as_str()],
            RawCheckpoint::from_row,
        )?;
        tx.commit()?;
        raw.into_checkpoint()
    }

    fn peek_checkpoint(&self, post_id: &PostId) -> Result<Option<Checkpoint>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("{SELECT_CHECKPOINT} WHERE post_id = ?1"),
                params![post_id.as_str()],
                RawCheckpoint::from_row,
            )
            .optional()?;
        raw.map(RawCheckpoint::into_checkpoint).transpose()
    }

    fn checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{SELECT_CHECKPOINT} ORDER BY post_id"))?;
        let rows = stmt
            .query_map([], RawCheckpoint::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawCheckpoint::into_checkpoint).collect()
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let post_id = checkpoint.post_id.as_str();
        let next_cursor = checkpoint.next_cursor.as_ref().map(Cursor::as_str);

        let existing: Option<(Option<String>, bool)> = tx
            .query_row(
                "SELECT next_cursor, done FROM checkpoints WHERE post_id = ?1",
                params![post_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((stored_cursor, true)) = existing {
            if !checkpoint.done || stored_cursor.as_deref() != next_cursor {
                return Err(StoreError::Sealed(checkpoint.post_id.clone()));
            }
        }

        tx.execute(
            "INSERT INTO checkpoints (post_id, next_cursor, done, total_users_found, last_updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(post_id) DO UPDATE SET
               next_cursor = excluded.next_cursor,
               done = excluded.done,
               total_users_found = MAX(checkpoints.total_users_found, excluded.total_users_found),
               last_updated_at = excluded.last_updated_at",
            params![
                post_id,
                next_cursor,
                checkpoint.done,
                to_sql_count(checkpoint.total_users_found),
                checkpoint.last_updated_at.map(format_timestamp),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn record_likers(
        &self,
        post_id: &PostId,
        likers: &[LikerProfile],
        fetched_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let fetched_at = format_timestamp(fetched_at);
        let mut inserted = 0u64;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO likers
                 (post_id, user_id, username, name, verified, created_at, description, public_metrics, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for liker in likers {
                let changed = stmt.execute(params![
                    post_id.as_str(),
                    liker.user_id,
                    liker.username,
                    liker.name,
                    liker.verified,
                    liker.created_at,
                    liker.description,
                    liker.public_metrics,
                    fetched_at,
                ])?;
                inserted += changed as u64;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn count_likers(&self, post_id: &PostId) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM likers WHERE post_id = ?1",
            params![post_id.as_str()],
            |row| row.get(0),
        )?;
        from_sql_count("count", count)
    }

    fn likers(&self, post_id: &PostId) -> Result<Vec<LikerRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, username, name, verified, created_at, description, public_metrics, fetched_at
             FROM likers WHERE post_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt
            .query_map(params![post_id.as_str()], |row| {
                let profile = LikerProfile {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    name: row.get(2)?,
                    verified: row.get(3)?,
                    created_at: row.get(4)?,
                    description: row.get(5)?,
                    public_metrics: row.get(6)?,
                };
                let fetched_at: String = row.get(7)?;
                Ok((profile, fetched_at))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(profile, fetched_at)| {
                Ok(LikerRecord {
                    post_id: post_id.clone(),
                    profile,
                    fetched_at: parse_timestamp("fetched_at", &fetched_at)?,
                })
            })
            .collect()
    }

    fn record_export(&self, post_id: &PostId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO exports (post_id, last_export_at) VALUES (?1, ?2)
             ON CONFLICT(post_id) DO UPDATE SET
               last_export_at = MAX(exports.last_export_at, excluded.last_export_at)",
            params![post_id.as_str(), format_timestamp(at)],
        )?;
        Ok(())
    }

    fn last_export(&self, post_id: &PostId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_export_at FROM exports WHERE post_id = ?1",
                params![post_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.as_deref()
            .map(|value| parse_timestamp("last_export_at", value))
            .transpose()
    }
}

struct RawCheckpoint {
    post_id: String,
    next_cursor: Option<String>,
    done: bool,
    total_users_found: i64,
    last_updated_at: Option<String>,
}

impl RawCheckpoint {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            post_id: row.get(0)?,
            next_cursor: row.get(1)?,
            done: row.get(2)?,
            total_users_found: row.get(3)?,
            last_updated_at: row.get(4)?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, StoreError> {
        Ok(Checkpoint {
            post_id: PostId::new(self.post_id),
            next_cursor: self.next_cursor.map(Cursor::new),
            done: self.done,
            total_users_found: from_sql_count("total_users_found", self.total_users_found)?,
            last_updated_at: self
                .last_updated_at
                .as_deref()
                .map(|value| parse_timestamp("last_updated_at", value))
                .transpose()?,
        })
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            column,
            value: value.to_string(),
        })
}

fn to_sql_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn from_sql_count(column: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        column,
        value: value.to_string(),
    })
}
