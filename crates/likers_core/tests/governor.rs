use std::sync::Once;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use likers_core::{Clearance, Governor, GovernorSettings, GovernorState, RateWindow};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn window(remaining: i64, reset_secs: i64) -> Option<RateWindow> {
    Some(RateWindow {
        remaining_calls: remaining,
        reset_at: at(reset_secs),
    })
}

fn quiet_settings() -> GovernorSettings {
    GovernorSettings {
        reset_buffer: Duration::ZERO,
        low_budget_delay: Duration::ZERO,
        ..GovernorSettings::default()
    }
}

#[test]
fn fresh_governor_allows_exactly_one_probe() {
    init_logging();
    let mut governor = Governor::new(GovernorSettings::default());
    assert_eq!(
        governor.state(),
        GovernorState::ExhaustedUnknown {
            probe_in_flight: false
        }
    );

    assert_eq!(governor.before_call(at(0)), Clearance::Proceed);
    assert_eq!(governor.before_call(at(1)), Clearance::ProbePending);

    governor.after_response(window(74, 900));
    assert_eq!(
        governor.state(),
        GovernorState::Ready {
            remaining: Some(74)
        }
    );
    assert_eq!(governor.before_call(at(2)), Clearance::Proceed);
    assert_eq!(governor.before_call(at(3)), Clearance::Proceed);
}

#[test]
fn failed_probe_allows_another_probe() {
    init_logging();
    let mut governor = Governor::new(GovernorSettings::default());
    assert_eq!(governor.before_call(at(0)), Clearance::Proceed);
    governor.on_call_failed();
    assert_eq!(governor.before_call(at(5)), Clearance::Proceed);
}

#[test]
fn exhausted_budget_waits_for_server_reset() {
    init_logging();
    let mut governor = Governor::new(quiet_settings());
    governor.before_call(at(0));
    governor.after_response(window(0, 900));

    assert_eq!(governor.before_call(at(10)), Clearance::WaitUntil(at(900)));
    assert_eq!(governor.wait_remaining(at(10)), Some(Duration::from_secs(890)));
    assert_eq!(governor.before_call(at(899)), Clearance::WaitUntil(at(900)));

    assert_eq!(governor.before_call(at(900)), Clearance::Proceed);
    assert_eq!(governor.state(), GovernorState::Ready { remaining: None });
    assert_eq!(governor.wait_remaining(at(900)), None);
}

#[test]
fn reset_buffer_extends_the_wait() {
    init_logging();
    let mut governor = Governor::new(GovernorSettings::default());
    governor.before_call(at(0));
    governor.after_response(window(0, 100));
    assert_eq!(governor.before_call(at(101)), Clearance::WaitUntil(at(102)));
    assert_eq!(governor.before_call(at(102)), Clearance::Proceed);
}

#[test]
fn refusal_overrides_optimistic_budget() {
    init_logging();
    let mut governor = Governor::new(quiet_settings());
    governor.before_call(at(0));
    governor.after_response(window(50, 900));

    let until = governor.on_rate_limited(Some(at(600)), at(10), 0.0);
    assert_eq!(until, at(600));
    assert_eq!(governor.before_call(at(20)), Clearance::WaitUntil(at(600)));
}

#[test]
fn refusal_wait_has_a_floor() {
    init_logging();
    let mut governor = Governor::new(quiet_settings());
    let until = governor.on_rate_limited(Some(at(11)), at(10), 0.0);
    assert_eq!(until, at(15));
}

#[test]
fn refusal_without_reset_backs_off_exponentially_up_to_cap() {
    init_logging();
    let mut governor = Governor::new(quiet_settings());

    assert_eq!(governor.on_rate_limited(None, at(0), 0.0), at(5));
    assert_eq!(governor.on_rate_limited(None, at(0), 0.0), at(10));
    assert_eq!(governor.on_rate_limited(None, at(0), 0.0), at(20));
    // A reset time already in the past counts as unusable.
    assert_eq!(governor.on_rate_limited(Some(at(-30)), at(0), 0.0), at(40));

    for _ in 0..20 {
        governor.on_rate_limited(None, at(0), 0.0);
    }
    assert_eq!(governor.on_rate_limited(None, at(0), 0.0), at(900));

    // A successful response clears the strike count.
    governor.after_response(window(10, 900));
    assert_eq!(governor.on_rate_limited(None, at(0), 0.0), at(5));
}

#[test]
fn low_budget_asks_caller_to_pace() {
    init_logging();
    let mut governor = Governor::new(GovernorSettings::default());
    governor.before_call(at(0));
    governor.after_response(window(5, 900));
    assert_eq!(
        governor.before_call(at(1)),
        Clearance::Pace(Duration::from_secs(2))
    );

    governor.after_response(window(6, 900));
    assert_eq!(governor.before_call(at(2)), Clearance::Proceed);
}

#[test]
fn response_without_headers_keeps_calls_flowing() {
    init_logging();
    let mut governor = Governor::new(GovernorSettings::default());
    governor.before_call(at(0));
    governor.after_response(None);
    assert_eq!(governor.state(), GovernorState::Ready { remaining: None });
    assert_eq!(governor.before_call(at(1)), Clearance::Proceed);
}

#[test]
fn reset_time_at_the_calendar_limit_falls_back_to_backoff() {
    init_logging();
    let mut governor = Governor::new(GovernorSettings::default());
    governor.before_call(at(0));
    governor.after_response(Some(RateWindow {
        remaining_calls: 0,
        reset_at: DateTime::<Utc>::MAX_UTC,
    }));
    assert_eq!(
        governor.state(),
        GovernorState::ExhaustedUnknown {
            probe_in_flight: false
        }
    );
    assert_eq!(governor.before_call(at(1)), Clearance::Proceed);

    let until = governor.on_rate_limited(Some(DateTime::<Utc>::MAX_UTC), at(1), 0.0);
    assert_eq!(until, at(6));
    assert_eq!(governor.before_call(at(2)), Clearance::WaitUntil(at(6)));
}
