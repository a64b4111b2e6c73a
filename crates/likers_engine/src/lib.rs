//! Likers engine: upstream client, durable store, pager and exporter.
mod api;
mod clock;
mod engine;
mod export;
mod filename;
mod ingest;
mod inspect;
mod pager;
mod persist;
mod progress;
mod store;
mod types;

pub use api::{
    ApiSettings, BearerToken, LikesApi, RequestSigner, ReqwestLikesApi, DEFAULT_API_BASE,
    RATE_REMAINING_HEADER, RATE_RESET_HEADER,
};
pub use clock::{Clock, SystemClock};
pub use engine::{Session, SessionConfig, SessionDeps, SessionReport};
pub use export::{
    export_likers, ArtifactUploader, ExportError, ExportSettings, ExportSummary, Exporter,
    UploadError,
};
pub use filename::export_stem;
pub use ingest::ingest;
pub use inspect::{inspect, inspect_all, StatusReport};
pub use pager::{Pager, PagerError, PagerReport, PagerSettings, StopReason};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use progress::{NoopProgressSink, ProgressSink};
pub use store::{SqliteStore, Store, StoreError};
pub use types::{
    ApiError, ApiErrorKind, LikesPage, PageRequest, PagerEvent, TransientCause,
};
