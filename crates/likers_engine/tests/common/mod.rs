#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use likers_core::{Checkpoint, Cursor, LikerProfile, LikerRecord, PostId, RateWindow};
use likers_engine::{
    ApiError, Clock, LikesApi, LikesPage, PageRequest, PagerEvent, ProgressSink, Store, StoreError,
};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn users(count: usize) -> Vec<LikerProfile> {
    (0..count)
        .map(|n| LikerProfile::new(format!("{:05}", n + 1), format!("user{}", n + 1)))
        .collect()
}

/// Time only moves when something sleeps.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// A clock whose sleeps never finish.
pub struct StuckClock(pub DateTime<Utc>);

#[async_trait::async_trait]
impl Clock for StuckClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }

    async fn sleep(&self, _duration: Duration) {
        std::future::pending::<()>().await;
    }
}

/// One scripted upstream behaviour; consumed in order before falling back to
/// serving pages with no rate headers.
pub enum Step {
    Serve { rate: Option<RateWindow> },
    /// Serve the page but report this cursor as the next one.
    ServeWithCursor(Option<Cursor>),
    Fail(ApiError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub at: DateTime<Utc>,
    pub cursor: Option<Cursor>,
}

/// In-memory liking-users endpoint. Cursors are `c{offset}`.
pub struct FakeLikesApi {
    clock: Arc<dyn Clock>,
    users: Vec<LikerProfile>,
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeLikesApi {
    pub fn new(clock: Arc<dyn Clock>, users: Vec<LikerProfile>) -> Arc<Self> {
        Self::scripted(clock, users, Vec::new())
    }

    pub fn scripted(clock: Arc<dyn Clock>, users: Vec<LikerProfile>, script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            users,
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn page(&self, request: &PageRequest) -> (Vec<LikerProfile>, Option<Cursor>) {
        let offset = request
            .cursor
            .as_ref()
            .map(|cursor| cursor.as_str().trim_start_matches('c').parse::<usize>().unwrap())
            .unwrap_or(0);
        let end = (offset + request.page_size.get() as usize).min(self.users.len());
        let next = (end < self.users.len()).then(|| Cursor::new(format!("c{end}")));
        (self.users[offset..end].to_vec(), next)
    }
}

#[async_trait::async_trait]
impl LikesApi for FakeLikesApi {
    async fn fetch_page(&self, request: &PageRequest) -> Result<LikesPage, ApiError> {
        self.calls.lock().unwrap().push(Call {
            at: self.clock.now(),
            cursor: request.cursor.clone(),
        });
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Serve { rate: None });

        let (users, next_cursor) = self.page(request);
        match step {
            Step::Serve { rate } => Ok(LikesPage {
                users,
                next_cursor,
                rate,
            }),
            Step::ServeWithCursor(cursor) => Ok(LikesPage {
                users,
                next_cursor: cursor,
                rate: None,
            }),
            Step::Fail(err) => Err(err),
        }
    }
}

#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PagerEvent>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PagerEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: PagerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Fails the Nth checkpoint save, simulating a crash after likers were
/// stored but before the cursor moved. Can also fail the first few snapshot
/// reads the exporter makes.
pub struct CrashingStore<S> {
    pub inner: S,
    fail_on_save: Mutex<Option<usize>>,
    saves: Mutex<usize>,
    failing_snapshots: Mutex<usize>,
}

impl<S: Store> CrashingStore<S> {
    pub fn new(inner: S, fail_on_save: usize) -> Self {
        Self {
            inner,
            fail_on_save: Mutex::new(Some(fail_on_save)),
            saves: Mutex::new(0),
            failing_snapshots: Mutex::new(0),
        }
    }

    /// Saves succeed; the first `count` calls to `likers` fail.
    pub fn failing_snapshots(inner: S, count: usize) -> Self {
        Self {
            inner,
            fail_on_save: Mutex::new(None),
            saves: Mutex::new(0),
            failing_snapshots: Mutex::new(count),
        }
    }
}

impl<S: Store> Store for CrashingStore<S> {
    fn load_checkpoint(&self, post_id: &PostId) -> Result<Checkpoint, StoreError> {
        self.inner.load_checkpoint(post_id)
    }

    fn peek_checkpoint(&self, post_id: &PostId) -> Result<Option<Checkpoint>, StoreError> {
        self.inner.peek_checkpoint(post_id)
    }

    fn checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError> {
        self.inner.checkpoints()
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut saves = self.saves.lock().unwrap();
        *saves += 1;
        if *self.fail_on_save.lock().unwrap() == Some(*saves) {
            return Err(StoreError::Poisoned);
        }
        self.inner.save_checkpoint(checkpoint)
    }

    fn record_likers(
        &self,
        post_id: &PostId,
        likers: &[LikerProfile],
        fetched_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.inner.record_likers(post_id, likers, fetched_at)
    }

    fn count_likers(&self, post_id: &PostId) -> Result<u64, StoreError> {
        self.inner.count_likers(post_id)
    }

    fn likers(&self, post_id: &PostId) -> Result<Vec<LikerRecord>, StoreError> {
        let mut failing = self.failing_snapshots.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return Err(StoreError::Poisoned);
        }
        drop(failing);
        self.inner.likers(post_id)
    }

    fn record_export(&self, post_id: &PostId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.record_export(post_id, at)
    }

    fn last_export(&self, post_id: &PostId) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.last_export(post_id)
    }
}
