use std::time::Duration;

/// How a failed call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble or a server-side failure; retrying may help.
    Transient,
    /// The server refused because the rate budget is spent.
    RateLimited,
    /// Retrying cannot help (bad credentials, missing post, rejected request).
    Fatal,
}

/// Exponential backoff: `min(max, base * 2^attempt) + jitter * sample`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
            jitter: Duration::from_millis(1200),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based). `jitter_sample` is
    /// clamped to `0.0..=1.0`.
    pub fn delay(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        let exponential = self.base.saturating_mul(factor).min(self.max);
        let sample = if jitter_sample.is_nan() {
            0.0
        } else {
            jitter_sample.clamp(0.0, 1.0)
        };
        let jitter = self.jitter.mul_f64(sample);
        exponential.saturating_add(jitter)
    }
}

/// Bounded retry policy for page requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for one page, counting the first. Rate-limit refusals
    /// do not count against it.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    DeferToGovernor,
    GiveUp,
}

impl RetryPolicy {
    /// Decide what to do after `failed_attempts` transient failures for the
    /// current page (the failure just observed included).
    pub fn decide(&self, class: ErrorClass, failed_attempts: u32, jitter_sample: f64) -> RetryDecision {
        match class {
            ErrorClass::Fatal => RetryDecision::GiveUp,
            ErrorClass::RateLimited => RetryDecision::DeferToGovernor,
            ErrorClass::Transient if failed_attempts >= self.max_attempts => RetryDecision::GiveUp,
            ErrorClass::Transient => RetryDecision::Retry {
                delay: self
                    .backoff
                    .delay(failed_attempts.saturating_sub(1), jitter_sample),
            },
        }
    }
}
