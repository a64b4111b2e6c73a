use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use engine_logging::{engine_debug, engine_info, engine_warn};
use likers_core::{ExportMode, LikerRecord, PostId};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::filename::export_stem;
use crate::persist::{AtomicFileWriter, PersistError};
use crate::progress::ProgressSink;
use crate::store::{Store, StoreError};
use crate::PagerEvent;

const CSV_HEADER: [&str; 10] = [
    "post_id",
    "user_id",
    "username",
    "name",
    "verified",
    "created_at",
    "description",
    "profile_url",
    "public_metrics",
    "fetched_at",
];

/// Upper bound on `-n` suffixes tried before giving up on a file name.
const MAX_COLLISIONS: u32 = 1000;

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    pub mode: ExportMode,
    /// Cadence of continuous snapshots.
    pub interval: Duration,
    pub write_manifest: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            mode: ExportMode::default(),
            interval: Duration::from_secs(300),
            write_manifest: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub rows: u64,
    pub csv_path: PathBuf,
    pub manifest_path: Option<PathBuf>,
    /// Hex SHA-256 of the CSV bytes.
    pub sha256: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("manifest encoding failed: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("upload of {path:?} failed: {message}")]
pub struct UploadError {
    pub path: PathBuf,
    pub message: String,
}

/// Ships a finished export somewhere else (object storage, a share).
#[async_trait::async_trait]
pub trait ArtifactUploader: Send + Sync {
    async fn upload(&self, summary: &ExportSummary) -> Result<(), UploadError>;
}

/// Snapshot every stored liker of `post_id` into a new CSV under
/// `output_dir`. Returns `None` when nothing is stored yet.
pub fn export_likers(
    store: &dyn Store,
    post_id: &PostId,
    output_dir: &Path,
    generated_at: DateTime<Utc>,
    write_manifest: bool,
) -> Result<Option<ExportSummary>, ExportError> {
    let records = store.likers(post_id)?;
    if records.is_empty() {
        engine_debug!("No likers stored for post {}; export skipped", post_id);
        return Ok(None);
    }

    let csv = render_csv(&records);
    let sha256 = hex_digest(csv.as_bytes());
    let writer = AtomicFileWriter::new(output_dir.to_path_buf());

    let mut collision = 0;
    let (stem, csv_path) = loop {
        let stem = export_stem(post_id, generated_at, collision);
        match writer.write_new(&format!("{stem}.csv"), csv.as_bytes()) {
            Ok(path) => break (stem, path),
            Err(PersistError::AlreadyExists(path)) if collision < MAX_COLLISIONS => {
                engine_debug!("Export target {:?} exists; trying next suffix", path);
                collision += 1;
            }
            Err(err) => return Err(err.into()),
        }
    };

    let rows = records.len() as u64;
    let manifest_path = if write_manifest {
        let checkpoint = store.peek_checkpoint(post_id)?;
        let manifest = json!({
            "post_id": post_id.as_str(),
            "rows": rows,
            "generated_at": generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "csv_file": csv_path.file_name().map(|name| name.to_string_lossy().into_owned()),
            "sha256": sha256,
            "checkpoint": checkpoint.map(|checkpoint| json!({
                "done": checkpoint.done,
                "total_users_found": checkpoint.total_users_found,
                "next_cursor": checkpoint.next_cursor,
                "last_updated_at": checkpoint.last_updated_at,
            })),
        });
        let body = serde_json::to_vec_pretty(&manifest)?;
        Some(writer.write_new(&format!("{stem}.json"), &body)?)
    } else {
        None
    };
    store.record_export(post_id, generated_at)?;

    engine_info!("Exported {} likers of post {} to {:?}", rows, post_id, csv_path);
    Ok(Some(ExportSummary {
        rows,
        csv_path,
        manifest_path,
        sha256,
        generated_at,
    }))
}

fn render_csv(records: &[LikerRecord]) -> String {
    let mut buffer = String::new();
    push_row(&mut buffer, CSV_HEADER.iter().copied());
    for record in records {
        let profile = &record.profile;
        let verified = if profile.verified { "true" } else { "false" };
        let profile_url = profile.profile_url().unwrap_or_default();
        let fetched_at = record
            .fetched_at
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        push_row(
            &mut buffer,
            [
                record.post_id.as_str(),
                profile.user_id.as_str(),
                profile.username.as_str(),
                profile.name.as_deref().unwrap_or(""),
                verified,
                profile.created_at.as_deref().unwrap_or(""),
                profile.description.as_deref().unwrap_or(""),
                profile_url.as_str(),
                profile.public_metrics.as_deref().unwrap_or(""),
                fetched_at.as_str(),
            ],
        );
    }
    buffer
}

fn push_row<'a>(buffer: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (index, field) in fields.into_iter().enumerate() {
        if index > 0 {
            buffer.push(',');
        }
        push_field(buffer, field);
    }
    buffer.push_str("\r\n");
}

fn push_field(buffer: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        buffer.push('"');
        buffer.push_str(&field.replace('"', "\"\""));
        buffer.push('"');
    } else {
        buffer.push_str(field);
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Export scheduling for one session: periodic snapshots in continuous mode
/// and the closing export.
pub struct Exporter {
    store: Arc<dyn Store>,
    settings: ExportSettings,
    uploader: Option<Arc<dyn ArtifactUploader>>,
    sink: Arc<dyn ProgressSink>,
}

impl Exporter {
    pub fn new(
        store: Arc<dyn Store>,
        settings: ExportSettings,
        uploader: Option<Arc<dyn ArtifactUploader>>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            store,
            settings,
            uploader,
            sink,
        }
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Export now, then hand the artifact to the uploader if one is set.
    /// Upload failures are logged only.
    pub async fn export_now(
        &self,
        post_id: &PostId,
        generated_at: DateTime<Utc>,
    ) -> Result<Option<ExportSummary>, ExportError> {
        let summary = match export_likers(
            self.store.as_ref(),
            post_id,
            &self.settings.output_dir,
            generated_at,
            self.settings.write_manifest,
        ) {
            Ok(summary) => summary,
            Err(err) => {
                self.sink.emit(PagerEvent::ExportFailed {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let Some(summary) = summary else {
            return Ok(None);
        };
        self.sink.emit(PagerEvent::ExportWritten {
            path: summary.csv_path.clone(),
            rows: summary.rows,
        });

        if let Some(uploader) = &self.uploader {
            match uploader.upload(&summary).await {
                Ok(()) => engine_info!("Uploaded {:?}", summary.csv_path),
                Err(err) => engine_warn!("{}", err),
            }
        }
        Ok(Some(summary))
    }

    /// Snapshot every `interval` until cancelled. A failed tick is logged and
    /// retried on the next one.
    pub async fn run_periodic(
        &self,
        post_id: &PostId,
        clock: &dyn Clock,
        cancel: &CancellationToken,
    ) {
        engine_info!(
            "Continuous export of post {} every {}s",
            post_id,
            self.settings.interval.as_secs()
        );
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = clock.sleep(self.settings.interval) => {}
            }
            if let Err(err) = self.export_now(post_id, clock.now()).await {
                engine_warn!("Periodic export of post {} failed: {}", post_id, err);
            }
        }
    }
}
