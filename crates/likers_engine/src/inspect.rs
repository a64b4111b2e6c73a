use chrono::{DateTime, Utc};
use likers_core::{Checkpoint, PostId};
use serde::Serialize;

use crate::store::{Store, StoreError};

/// Read-only view of one post's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub post_id: PostId,
    /// `None` when the post was never fetched.
    pub checkpoint: Option<Checkpoint>,
    pub liker_count: u64,
    /// `None` until a CSV snapshot has been written.
    pub last_export_at: Option<DateTime<Utc>>,
}

pub fn inspect(store: &dyn Store, post_id: &PostId) -> Result<StatusReport, StoreError> {
    Ok(StatusReport {
        post_id: post_id.clone(),
        checkpoint: store.peek_checkpoint(post_id)?,
        liker_count: store.count_likers(post_id)?,
        last_export_at: store.last_export(post_id)?,
    })
}

/// Status of every post the store knows about.
pub fn inspect_all(store: &dyn Store) -> Result<Vec<StatusReport>, StoreError> {
    store
        .checkpoints()?
        .into_iter()
        .map(|checkpoint| {
            let liker_count = store.count_likers(&checkpoint.post_id)?;
            let last_export_at = store.last_export(&checkpoint.post_id)?;
            Ok(StatusReport {
                post_id: checkpoint.post_id.clone(),
                checkpoint: Some(checkpoint),
                liker_count,
                last_export_at,
            })
        })
        .collect()
}
