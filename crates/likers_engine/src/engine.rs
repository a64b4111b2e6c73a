use std::sync::Arc;

use engine_logging::{engine_info, engine_warn};
use likers_core::{ExportMode, PostId};
use tokio_util::sync::CancellationToken;

use crate::api::LikesApi;
use crate::clock::Clock;
use crate::export::{ArtifactUploader, ExportSettings, ExportSummary, Exporter};
use crate::pager::{Pager, PagerError, PagerReport, PagerSettings};
use crate::progress::ProgressSink;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub post_id: PostId,
    pub pager: PagerSettings,
    pub export: ExportSettings,
}

/// Collaborators shared by the pager and the exporter.
#[derive(Clone)]
pub struct SessionDeps {
    pub api: Arc<dyn LikesApi>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn ProgressSink>,
    pub uploader: Option<Arc<dyn ArtifactUploader>>,
}

#[derive(Debug)]
pub struct SessionReport {
    pub pager: Result<PagerReport, PagerError>,
    /// Closing export, when one was written.
    pub final_export: Option<ExportSummary>,
}

/// One fetch session for one post: the pager in the foreground and, in
/// continuous mode, a snapshot task beside it.
pub struct Session {
    config: SessionConfig,
    deps: SessionDeps,
}

impl Session {
    pub fn new(config: SessionConfig, deps: SessionDeps) -> Self {
        Self { config, deps }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> SessionReport {
        let post_id = &self.config.post_id;
        let exporter = Arc::new(Exporter::new(
            self.deps.store.clone(),
            self.config.export.clone(),
            self.deps.uploader.clone(),
            self.deps.sink.clone(),
        ));
        let continuous = self.config.export.mode == ExportMode::Continuous;

        let periodic_cancel = cancel.child_token();
        let periodic = continuous.then(|| {
            let exporter = exporter.clone();
            let clock = self.deps.clock.clone();
            let post_id = post_id.clone();
            let token = periodic_cancel.clone();
            tokio::spawn(async move {
                exporter
                    .run_periodic(&post_id, clock.as_ref(), &token)
                    .await;
            })
        });

        let pager = Pager::new(
            self.deps.api.clone(),
            self.deps.store.clone(),
            self.deps.clock.clone(),
            self.deps.sink.clone(),
            self.config.pager.clone(),
        );
        let result = pager.run(post_id, cancel).await;

        periodic_cancel.cancel();
        if let Some(handle) = periodic {
            if let Err(err) = handle.await {
                engine_warn!("Periodic export task ended abnormally: {}", err);
            }
        }

        let done = match &result {
            Ok(report) => report.checkpoint.done,
            Err(_) => false,
        };
        let final_export = if continuous || done {
            match exporter.export_now(post_id, self.deps.clock.now()).await {
                Ok(summary) => summary,
                Err(err) => {
                    engine_warn!("Closing export of post {} failed: {}", post_id, err);
                    None
                }
            }
        } else {
            engine_info!("Post {} not complete; final export deferred", post_id);
            None
        };

        SessionReport {
            pager: result,
            final_export,
        }
    }
}
