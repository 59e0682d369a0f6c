use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rate_guard_admission::clock::{CancelToken, ClockSource, SleepMode, VirtualClock};
use rate_guard_admission::{AdmissionEngine, AdmissionParams, Decision, EngineConfig, Rejection};

const ADMITTED: Decision = Decision::Admitted;

fn engine_with(
    config: EngineConfig,
    mode: SleepMode,
) -> (Arc<VirtualClock>, Arc<AdmissionEngine<Arc<VirtualClock>>>) {
    let clock = Arc::new(VirtualClock::new(mode));
    let engine = Arc::new(AdmissionEngine::with_clock(config, Arc::clone(&clock)));
    (clock, engine)
}

#[test]
fn test_shaping_admits_everything_in_single_threaded_simulation() {
    let (clock, engine) = engine_with(EngineConfig::default(), SleepMode::Advance);
    let params = AdmissionParams::new("shaped", 5.0).shape_requests(true);

    for i in 0..15 {
        assert_eq!(engine.admit(&params), Ok(ADMITTED), "request {}", i);
    }

    // 5 from the initial burst, then one every 200ms for the other 10
    assert_eq!(clock.nano_time(), 2_000_000_000);
    assert_eq!(engine.sleepers_in_flight(), 0);
}

#[test]
fn test_shaping_sleeps_only_as_long_as_needed() {
    let (clock, engine) = engine_with(EngineConfig::default(), SleepMode::Advance);
    let params = AdmissionParams::new("partial-wait", 4.0).shape_requests(true);

    for _ in 0..4 {
        assert_eq!(engine.admit(&params), Ok(ADMITTED));
    }

    // A quarter point has already accrued, so the wait is 3/4 of 250ms
    clock.advance_millis(62);
    clock.advance_nanos(500_000);
    assert_eq!(engine.admit(&params), Ok(ADMITTED));
    assert_eq!(clock.nano_time(), 250_000_000);
}

#[test]
fn test_sleep_budget_caps_parked_requests() {
    const RATE: f64 = 2.0;
    const MAX_SLEEPERS: usize = 2;

    let config = EngineConfig {
        max_sleep_threads: MAX_SLEEPERS,
        max_shaping_retries: 64,
        max_shaping_delay_ms: 60_000,
        ..EngineConfig::default()
    };
    let (clock, engine) = engine_with(config, SleepMode::Gate);
    let params = AdmissionParams::new("gated", RATE).shape_requests(true);

    // Let the bucket fill, then drain it
    assert_eq!(engine.admit(&params), Ok(ADMITTED));
    clock.advance(Duration::from_secs(30));
    for _ in 0..RATE as usize {
        assert_eq!(engine.admit(&params), Ok(ADMITTED));
    }

    // Park as many requests as the budget allows
    let sleepers: Vec<_> = (0..MAX_SLEEPERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let params = params.clone();
            thread::spawn(move || engine.admit(&params))
        })
        .collect();
    assert!(clock.wait_for_sleepers(MAX_SLEEPERS, Duration::from_secs(10)));
    assert_eq!(engine.sleepers_in_flight(), MAX_SLEEPERS);

    // One more cannot sleep and is turned away without blocking
    assert_eq!(
        engine.admit(&params),
        Ok(Decision::Rejected(Rejection::SleepBudgetExhausted))
    );

    // Release time in half-second steps until every parked request has its point
    for _ in 0..1_000 {
        if sleepers.iter().all(|handle| handle.is_finished()) {
            break;
        }
        clock.advance_millis(500);
        clock.open_gate();
        thread::sleep(Duration::from_millis(2));
    }

    for handle in sleepers {
        assert_eq!(handle.join().unwrap(), Ok(ADMITTED));
    }
    assert_eq!(engine.sleepers_in_flight(), 0);
}

#[test]
fn test_zero_sleep_budget_rejects_instead_of_shaping() {
    let (_clock, engine) = engine_with(EngineConfig::default(), SleepMode::Fail);
    engine.set_max_sleep_threads(0);
    let params = AdmissionParams::new("no-sleepers", 1.0).shape_requests(true);

    assert_eq!(engine.admit(&params), Ok(ADMITTED));
    assert_eq!(
        engine.admit(&params),
        Ok(Decision::Rejected(Rejection::SleepBudgetExhausted))
    );
}

#[test]
fn test_retry_ceiling_stops_shaping() {
    let config = EngineConfig {
        max_shaping_retries: 0,
        ..EngineConfig::default()
    };
    let (_clock, engine) = engine_with(config, SleepMode::Fail);
    let params = AdmissionParams::new("no-retries", 1.0).shape_requests(true);

    assert_eq!(engine.admit(&params), Ok(ADMITTED));
    assert_eq!(
        engine.admit(&params),
        Ok(Decision::Rejected(Rejection::ShapingDelayExceeded))
    );
}

#[test]
fn test_delay_ceiling_stops_shaping() {
    let config = EngineConfig {
        max_shaping_delay_ms: 50,
        ..EngineConfig::default()
    };
    let (clock, engine) = engine_with(config, SleepMode::Advance);

    // Needs a full second per point: over the 50ms ceiling, so no sleep at all
    let slow = AdmissionParams::new("slow", 1.0).shape_requests(true);
    assert_eq!(engine.admit(&slow), Ok(ADMITTED));
    assert_eq!(
        engine.admit(&slow),
        Ok(Decision::Rejected(Rejection::ShapingDelayExceeded))
    );
    assert_eq!(clock.nano_time(), 0);

    // 10ms per point fits under the ceiling
    let fast = AdmissionParams::new("fast", 100.0).shape_requests(true);
    for _ in 0..101 {
        assert_eq!(engine.admit(&fast), Ok(ADMITTED));
    }
    assert_eq!(clock.nano_time(), 10_000_000);
}

#[test]
fn test_hard_limit_overrides_shaping() {
    let (_clock, engine) = engine_with(EngineConfig::default(), SleepMode::Fail);
    let params = AdmissionParams::new("hard", 2.0).hard_limit(true).shape_requests(true);

    assert_eq!(engine.admit(&params), Ok(ADMITTED));
    assert_eq!(engine.admit(&params), Ok(ADMITTED));
    assert_eq!(engine.admit(&params), Ok(Decision::Rejected(Rejection::RateExceeded)));
    assert_eq!(engine.sleepers_in_flight(), 0);
}

#[test]
fn test_cancel_interrupts_shaping_sleep() {
    let (clock, engine) = engine_with(EngineConfig::default(), SleepMode::Gate);
    let params = AdmissionParams::new("interrupted", 1.0).shape_requests(true);
    assert_eq!(engine.admit(&params), Ok(ADMITTED));

    let cancel = CancelToken::new();
    let waiter = {
        let engine = Arc::clone(&engine);
        let params = params.clone();
        let cancel = cancel.clone();
        thread::spawn(move || engine.admit_cancellable(&params, &cancel))
    };

    assert!(clock.wait_for_sleepers(1, Duration::from_secs(10)));
    cancel.cancel();

    assert_eq!(
        waiter.join().unwrap(),
        Ok(Decision::Rejected(Rejection::Interrupted))
    );
    // The caller still sees its own cancellation
    assert!(cancel.is_cancelled());
    assert_eq!(engine.sleepers_in_flight(), 0);
}

#[test]
fn test_cancelled_token_only_matters_when_shaping() {
    let (_clock, engine) = engine_with(EngineConfig::default(), SleepMode::Fail);
    let params = AdmissionParams::new("pre-cancelled", 1.0).shape_requests(true);
    let cancel = CancelToken::new();
    cancel.cancel();

    // A point is available: no wait, so the token is irrelevant
    assert_eq!(engine.admit_cancellable(&params, &cancel), Ok(ADMITTED));

    // Needs a wait: refused without sleeping
    assert_eq!(
        engine.admit_cancellable(&params, &cancel),
        Ok(Decision::Rejected(Rejection::Interrupted))
    );
}

#[test]
fn test_shaped_requests_share_points_fairly_with_direct_ones() {
    let (clock, engine) = engine_with(EngineConfig::default(), SleepMode::Advance);
    let shaped = AdmissionParams::new("mixed", 10.0).shape_requests(true);
    let direct = AdmissionParams::new("mixed", 10.0);

    for _ in 0..10 {
        assert_eq!(engine.admit(&direct), Ok(ADMITTED));
    }
    assert_eq!(engine.admit(&direct), Ok(Decision::Rejected(Rejection::RateExceeded)));

    // The shaped call waits 100ms for its point
    assert_eq!(engine.admit(&shaped), Ok(ADMITTED));
    assert_eq!(clock.nano_time(), 100_000_000);
    assert_eq!(engine.admit(&direct), Ok(Decision::Rejected(Rejection::RateExceeded)));
}
