//! Rate-limit governor.
//!
//! The governor never reads a clock: every transition takes `now` from the
//! caller, and reset times always come from the server.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::retry::Backoff;
use crate::RateWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorSettings {
    /// Added to every server reset time.
    pub reset_buffer: Duration,
    /// Lower bound for a wait caused by a rate-limit refusal.
    pub min_rate_limit_wait: Duration,
    /// At or below this many remaining calls the caller is asked to pace.
    pub low_budget_threshold: i64,
    pub low_budget_delay: Duration,
    /// Used when a refusal carries no usable reset time.
    pub backoff: Backoff,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            reset_buffer: Duration::from_secs(2),
            min_rate_limit_wait: Duration::from_secs(5),
            low_budget_threshold: 5,
            low_budget_delay: Duration::from_secs(2),
            backoff: Backoff {
                base: Duration::from_secs(5),
                max: Duration::from_secs(900),
                jitter: Duration::from_millis(1200),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorState {
    /// No budget information yet (first call, or after a restart).
    ExhaustedUnknown { probe_in_flight: bool },
    /// Calls may proceed. `remaining` is `None` when the last response carried
    /// no budget headers or a wait has just elapsed.
    Ready { remaining: Option<i64> },
    Waiting { reset_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clearance {
    Proceed,
    /// Budget is nearly spent: sleep for the given delay, then proceed.
    Pace(Duration),
    /// Suspend until the given instant, then ask again.
    WaitUntil(DateTime<Utc>),
    /// A probing call is still outstanding; record its outcome first.
    ProbePending,
}

#[derive(Debug, Clone)]
pub struct Governor {
    settings: GovernorSettings,
    state: GovernorState,
    /// Consecutive refusals without a successful response in between.
    strikes: u32,
}

impl Governor {
    pub fn new(settings: GovernorSettings) -> Self {
        Self {
            settings,
            state: GovernorState::ExhaustedUnknown {
                probe_in_flight: false,
            },
            strikes: 0,
        }
    }

    pub fn state(&self) -> GovernorState {
        self.state
    }

    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    pub fn before_call(&mut self, now: DateTime<Utc>) -> Clearance {
        match self.state {
            GovernorState::Waiting { reset_at } if now < reset_at => Clearance::WaitUntil(reset_at),
            GovernorState::Waiting { .. } => {
                self.state = GovernorState::Ready { remaining: None };
                Clearance::Proceed
            }
            GovernorState::ExhaustedUnknown {
                probe_in_flight: true,
            } => Clearance::ProbePending,
            GovernorState::ExhaustedUnknown {
                probe_in_flight: false,
            } => {
                self.state = GovernorState::ExhaustedUnknown {
                    probe_in_flight: true,
                };
                Clearance::Proceed
            }
            GovernorState::Ready {
                remaining: Some(remaining),
            } if remaining <= self.settings.low_budget_threshold
                && !self.settings.low_budget_delay.is_zero() =>
            {
                Clearance::Pace(self.settings.low_budget_delay)
            }
            GovernorState::Ready { .. } => Clearance::Proceed,
        }
    }

    /// Record a successful response and the budget it reported.
    pub fn after_response(&mut self, window: Option<RateWindow>) {
        self.strikes = 0;
        self.state = match window {
            Some(window) if window.remaining_calls <= 0 => match self.buffered(window.reset_at) {
                Some(reset_at) => GovernorState::Waiting { reset_at },
                // Unusable reset time: fall back to a single probe, whose
                // refusal takes the backoff path.
                None => GovernorState::ExhaustedUnknown {
                    probe_in_flight: false,
                },
            },
            Some(window) => GovernorState::Ready {
                remaining: Some(window.remaining_calls),
            },
            None => GovernorState::Ready { remaining: None },
        };
    }

    /// Record a rate-limit refusal and return the instant to wait until.
    ///
    /// The server's reset time wins over any local budget estimate. Without a
    /// reset time in the future, backoff grows with consecutive refusals.
    pub fn on_rate_limited(
        &mut self,
        reset_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        jitter_sample: f64,
    ) -> DateTime<Utc> {
        self.strikes = self.strikes.saturating_add(1);
        let buffered = reset_at
            .filter(|reset_at| *reset_at > now)
            .and_then(|reset_at| self.buffered(reset_at));
        let until = match buffered {
            Some(buffered) => {
                let earliest = now + to_chrono(self.settings.min_rate_limit_wait);
                buffered.max(earliest)
            }
            None => {
                let delay = self.settings.backoff.delay(self.strikes - 1, jitter_sample);
                now + to_chrono(delay)
            }
        };
        self.state = GovernorState::Waiting { reset_at: until };
        until
    }

    /// Record a call that failed without budget information.
    pub fn on_call_failed(&mut self) {
        if let GovernorState::ExhaustedUnknown { .. } = self.state {
            self.state = GovernorState::ExhaustedUnknown {
                probe_in_flight: false,
            };
        }
    }

    /// Server reset time plus the buffer; `None` when that is not a
    /// representable instant.
    fn buffered(&self, reset_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        reset_at.checked_add_signed(to_chrono(self.settings.reset_buffer))
    }

    pub fn wait_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.state {
            GovernorState::Waiting { reset_at } => (reset_at - now).to_std().ok(),
            _ => None,
        }
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 1_000);
    chrono::Duration::milliseconds(millis)
}
