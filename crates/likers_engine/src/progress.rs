use crate::PagerEvent;

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: PagerEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _event: PagerEvent) {}
}
