//! Resumable fetch loop for one post.
//!
//! The checkpoint only moves after a page's likers are stored, so stopping at
//! any point (error, cancellation, crash) resumes from the last page whose
//! checkpoint was saved.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use engine_logging::{engine_debug, engine_info, engine_warn};
use likers_core::{
    Checkpoint, Clearance, Cursor, CursorGuard, ErrorClass, Governor, GovernorSettings, LikerProfile,
    PageSize, PostId, RepeatedCursor, RetryDecision, RetryPolicy,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::LikesApi;
use crate::clock::Clock;
use crate::ingest::ingest;
use crate::progress::ProgressSink;
use crate::store::{Store, StoreError};
use crate::{ApiError, ApiErrorKind, LikesPage, PageRequest, PagerEvent};

#[derive(Debug, Clone)]
pub struct PagerSettings {
    pub page_size: PageSize,
    /// Pause between pages.
    pub page_delay: Duration,
    /// Stop after this many pages in one session.
    pub max_pages: Option<u32>,
    /// How often a rate-limit wait reports its remaining time.
    pub countdown_interval: Duration,
    pub retry: RetryPolicy,
    pub governor: GovernorSettings,
}

impl Default for PagerSettings {
    fn default() -> Self {
        Self {
            page_size: PageSize::default(),
            page_delay: Duration::from_secs(2),
            max_pages: None,
            countdown_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            governor: GovernorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    /// The checkpoint was already done when the session started.
    AlreadyComplete,
    Cancelled,
    PageLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerReport {
    /// Last persisted checkpoint.
    pub checkpoint: Checkpoint,
    pub pages_fetched: u32,
    pub users_inserted: u64,
    pub stop: StopReason,
}

#[derive(Debug, Error)]
pub enum PagerError {
    #[error("upstream refused the request: {0}")]
    Fatal(ApiError),
    #[error("giving up after {attempts} failed attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ApiError },
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error(transparent)]
    CursorRepeated(#[from] RepeatedCursor),
    #[error("rate-limit probe already in flight")]
    ProbePending,
}

pub struct Pager {
    api: Arc<dyn LikesApi>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ProgressSink>,
    settings: PagerSettings,
}

struct Progress {
    pages: u32,
    inserted: u64,
}

impl Pager {
    pub fn new(
        api: Arc<dyn LikesApi>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ProgressSink>,
        settings: PagerSettings,
    ) -> Self {
        Self {
            api,
            store,
            clock,
            sink,
            settings,
        }
    }

    /// Fetch pages until the post is done, the session is cancelled, the page
    /// limit is reached, or a fatal error occurs.
    pub async fn run(
        &self,
        post_id: &PostId,
        cancel: &CancellationToken,
    ) -> Result<PagerReport, PagerError> {
        let mut checkpoint = self.store.load_checkpoint(post_id)?;

        // A crash between storing likers and saving the checkpoint leaves rows
        // the checkpoint does not count; the re-fetched page inserts nothing.
        let stored = self.store.count_likers(post_id)?;
        if checkpoint.reconcile_total(stored) {
            engine_warn!(
                "Post {}: checkpoint total behind stored likers, raised to {}",
                post_id,
                stored
            );
            self.store.save_checkpoint(&checkpoint)?;
        }

        let mut progress = Progress {
            pages: 0,
            inserted: 0,
        };

        if checkpoint.done {
            engine_info!(
                "Post {} already complete with {} likers",
                post_id,
                checkpoint.total_users_found
            );
            self.sink.emit(PagerEvent::AlreadyComplete {
                post_id: post_id.clone(),
                total_users_found: checkpoint.total_users_found,
            });
            return Ok(report(checkpoint, &progress, StopReason::AlreadyComplete));
        }

        engine_info!(
            "Post {}: starting at cursor {:?} with {} likers known",
            post_id,
            checkpoint.next_cursor.as_ref().map(Cursor::as_str),
            checkpoint.total_users_found
        );
        self.sink.emit(PagerEvent::Resumed {
            checkpoint: checkpoint.clone(),
        });

        // Budget information never survives a restart.
        let mut governor = Governor::new(self.settings.governor);
        let mut guard = CursorGuard::starting_at(checkpoint.next_cursor.as_ref());

        loop {
            if let Some(max_pages) = self.settings.max_pages {
                if progress.pages >= max_pages {
                    engine_info!("Post {}: page limit {} reached", post_id, max_pages);
                    return Ok(report(checkpoint, &progress, StopReason::PageLimit));
                }
            }

            let page_number = progress.pages + 1;
            let Some(page) = self
                .fetch_page(&mut governor, &checkpoint, page_number, cancel)
                .await?
            else {
                return Ok(self.cancelled(checkpoint, &progress));
            };

            guard.observe(page.next_cursor.as_ref())?;

            let LikesPage {
                users,
                next_cursor,
                rate,
            } = page;
            let now = self.clock.now();
            let inserted = ingest(self.store.as_ref(), post_id, &users, now)?;
            let next = checkpoint.advance(next_cursor, inserted, now);
            self.store.save_checkpoint(&next)?;
            checkpoint = next;
            governor.after_response(rate);

            progress.pages += 1;
            progress.inserted += inserted;
            self.log_commit(page_number, &users, inserted, &checkpoint);

            if checkpoint.done {
                engine_info!(
                    "Post {} complete: {} likers",
                    post_id,
                    checkpoint.total_users_found
                );
                return Ok(report(checkpoint, &progress, StopReason::Completed));
            }

            if !self.settings.page_delay.is_zero()
                && !self.pause(self.settings.page_delay, cancel).await
            {
                return Ok(self.cancelled(checkpoint, &progress));
            }
        }
    }

    /// Request the page at the checkpoint's cursor, retrying transient
    /// failures and waiting out rate limits. `None` means cancelled.
    async fn fetch_page(
        &self,
        governor: &mut Governor,
        checkpoint: &Checkpoint,
        page_number: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<LikesPage>, PagerError> {
        let request = PageRequest {
            post_id: checkpoint.post_id.clone(),
            cursor: checkpoint.next_cursor.clone(),
            page_size: self.settings.page_size,
        };
        let mut failures = 0u32;

        loop {
            if !self.await_clearance(governor, cancel).await? {
                return Ok(None);
            }

            self.sink.emit(PagerEvent::PageRequested {
                page: page_number,
                cursor: request.cursor.clone(),
                attempt: failures + 1,
            });
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                result = self.api.fetch_page(&request) => result,
            };
            let err = match result {
                Ok(page) => return Ok(Some(page)),
                Err(err) => err,
            };

            match err.kind.class() {
                ErrorClass::RateLimited => {
                    let reset_at = match err.kind {
                        ApiErrorKind::RateLimited { reset_at } => reset_at,
                        _ => None,
                    };
                    let until = governor.on_rate_limited(reset_at, self.clock.now(), rand::random());
                    engine_warn!(
                        "Rate limited on page {} (server reset {:?}); waiting until {}",
                        page_number,
                        reset_at,
                        until
                    );
                }
                class => {
                    governor.on_call_failed();
                    if class == ErrorClass::Transient {
                        failures += 1;
                    }
                    match self.settings.retry.decide(class, failures, rand::random()) {
                        RetryDecision::Retry { delay } => {
                            engine_warn!(
                                "Page {} attempt {} failed ({}); retrying in {:.1}s",
                                page_number,
                                failures,
                                err,
                                delay.as_secs_f64()
                            );
                            self.sink.emit(PagerEvent::RetryScheduled {
                                attempt: failures,
                                delay,
                                reason: err.to_string(),
                            });
                            if !self.pause(delay, cancel).await {
                                return Ok(None);
                            }
                        }
                        RetryDecision::GiveUp if class == ErrorClass::Fatal => {
                            return Err(PagerError::Fatal(err));
                        }
                        RetryDecision::GiveUp | RetryDecision::DeferToGovernor => {
                            return Err(PagerError::RetriesExhausted {
                                attempts: failures,
                                last: err,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Block until the governor clears a call. `false` means cancelled.
    async fn await_clearance(
        &self,
        governor: &mut Governor,
        cancel: &CancellationToken,
    ) -> Result<bool, PagerError> {
        loop {
            match governor.before_call(self.clock.now()) {
                Clearance::Proceed => return Ok(true),
                Clearance::Pace(delay) => {
                    engine_debug!("Rate budget low; pacing for {:?}", delay);
                    return Ok(self.pause(delay, cancel).await);
                }
                Clearance::WaitUntil(until) => {
                    if !self.wait_until(until, cancel).await {
                        return Ok(false);
                    }
                }
                Clearance::ProbePending => return Err(PagerError::ProbePending),
            }
        }
    }

    async fn wait_until(&self, until: DateTime<Utc>, cancel: &CancellationToken) -> bool {
        loop {
            let remaining = match (until - self.clock.now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => return true,
            };
            engine_info!(
                "Rate limit reached; {}s remaining until {}",
                remaining.as_secs(),
                until
            );
            self.sink.emit(PagerEvent::RateLimitWait { until, remaining });

            let step = if self.settings.countdown_interval.is_zero() {
                remaining
            } else {
                remaining.min(self.settings.countdown_interval)
            };
            if !self.pause(step, cancel).await {
                return false;
            }
        }
    }

    /// Sleep unless cancelled first. `false` means cancelled.
    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.clock.sleep(duration) => true,
        }
    }

    fn cancelled(&self, checkpoint: Checkpoint, progress: &Progress) -> PagerReport {
        engine_info!(
            "Post {}: stopped by request at cursor {:?}",
            checkpoint.post_id,
            checkpoint.next_cursor.as_ref().map(Cursor::as_str)
        );
        report(checkpoint, progress, StopReason::Cancelled)
    }

    fn log_commit(&self, page: u32, users: &[LikerProfile], inserted: u64, checkpoint: &Checkpoint) {
        engine_info!(
            "Page {}: {} users, {} new (total {})",
            page,
            users.len(),
            inserted,
            checkpoint.total_users_found
        );
        self.sink.emit(PagerEvent::PageCommitted {
            page,
            received: users.len(),
            inserted,
            total_users_found: checkpoint.total_users_found,
            done: checkpoint.done,
        });
    }
}

fn report(checkpoint: Checkpoint, progress: &Progress, stop: StopReason) -> PagerReport {
    PagerReport {
        checkpoint,
        pages_fetched: progress.pages,
        users_inserted: progress.inserted,
        stop,
    }
}
