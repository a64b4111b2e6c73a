use std::collections::HashSet;

use chrono::{DateTime, Utc};
use engine_logging::{engine_debug, engine_warn};
use likers_core::{LikerProfile, PostId};

use crate::store::{Store, StoreError};

/// Write one page of likers, returning how many were not already stored.
///
/// Pages may overlap earlier ones (a resumed session re-fetches the page whose
/// checkpoint never landed); overlapping users are counted zero times.
pub fn ingest(
    store: &dyn Store,
    post_id: &PostId,
    users: &[LikerProfile],
    fetched_at: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let mut seen = HashSet::new();
    let mut batch = Vec::with_capacity(users.len());
    for user in users {
        if user.user_id.trim().is_empty() {
            engine_warn!("Skipping liker without an id (username {:?})", user.username);
            continue;
        }
        if seen.insert(user.user_id.as_str()) {
            batch.push(user.clone());
        }
    }

    if batch.is_empty() {
        return Ok(0);
    }

    let inserted = store.record_likers(post_id, &batch, fetched_at)?;
    engine_debug!(
        "Ingested page for post {}: {} received, {} new",
        post_id,
        users.len(),
        inserted
    );
    Ok(inserted)
}
