//! Likers core: pure pagination, checkpoint and rate-limit state.
mod config;
mod cursor;
mod governor;
mod ids;
mod retry;
mod state;

pub use config::{ConfigError, ExportMode, PageSize, MAX_PAGE_SIZE};
pub use cursor::{CursorGuard, RepeatedCursor};
pub use governor::{Clearance, Governor, GovernorSettings, GovernorState};
pub use ids::{Cursor, PostId};
pub use retry::{Backoff, ErrorClass, RetryDecision, RetryPolicy};
pub use state::{Checkpoint, LikerProfile, LikerRecord, RateWindow};
