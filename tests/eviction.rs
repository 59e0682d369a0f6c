use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rate_guard_admission::clock::{SleepMode, VirtualClock};
use rate_guard_admission::{
    AdmissionEngine, AdmissionParams, Decision, EngineConfig, EvictionSweeper, Rejection,
};

const ADMITTED: Decision = Decision::Admitted;

fn new_engine(config: EngineConfig) -> (Arc<VirtualClock>, Arc<AdmissionEngine<Arc<VirtualClock>>>) {
    let clock = Arc::new(VirtualClock::new(SleepMode::Fail));
    let engine = Arc::new(AdmissionEngine::with_clock(config, Arc::clone(&clock)));
    (clock, engine)
}

/// Polls `condition` in real time until it holds or `timeout` passes.
fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_evict_stale_skips_counters_with_work_in_flight() {
    let (clock, engine) = new_engine(EngineConfig::default());
    let params = AdmissionParams::new("busy", 100.0).max_concurrency(5);
    assert_eq!(engine.admit(&params), Ok(ADMITTED));

    clock.advance(Duration::from_secs(3600));
    assert_eq!(engine.evict_stale(Duration::from_secs(60)), 0);
    assert!(engine.query("busy").is_some());

    engine.release("busy");
    assert_eq!(engine.evict_stale(Duration::from_secs(60)), 1);
    assert_eq!(engine.query("busy"), None);
}

#[test]
fn test_evict_stale_keeps_recently_used_counters() {
    let (clock, engine) = new_engine(EngineConfig::default());
    assert_eq!(engine.admit(&AdmissionParams::new("idle", 10.0)), Ok(ADMITTED));

    clock.advance(Duration::from_secs(50));
    assert_eq!(engine.admit(&AdmissionParams::new("active", 10.0)), Ok(ADMITTED));

    clock.advance(Duration::from_secs(20));
    assert_eq!(engine.evict_stale(Duration::from_secs(60)), 1);
    assert_eq!(engine.query("idle"), None);
    assert!(engine.query("active").is_some());
}

#[test]
fn test_evicted_counter_comes_back_full() {
    let (clock, engine) = new_engine(EngineConfig::default());
    let params = AdmissionParams::new("recycled", 3.0);

    for _ in 0..3 {
        assert_eq!(engine.admit(&params), Ok(ADMITTED));
    }
    assert_eq!(engine.admit(&params), Ok(Decision::Rejected(Rejection::RateExceeded)));

    clock.advance(Duration::from_secs(7200));
    assert_eq!(engine.evict_stale(Duration::from_secs(600)), 1);
    assert!(engine.registry().is_empty());

    for _ in 0..3 {
        assert_eq!(engine.admit(&params), Ok(ADMITTED));
    }
    assert_eq!(engine.admit(&params), Ok(Decision::Rejected(Rejection::RateExceeded)));
}

#[test]
fn test_release_after_eviction_is_ignored() {
    let (clock, engine) = new_engine(EngineConfig::default());
    let params = AdmissionParams::new("gone", 10.0).max_concurrency(1);
    let handle = {
        assert_eq!(engine.admit(&params), Ok(ADMITTED));
        engine.registry().get("gone").unwrap()
    };
    engine.release("gone");

    clock.advance(Duration::from_secs(120));
    assert_eq!(engine.evict_stale(Duration::from_secs(60)), 1);
    assert!(handle.is_retired());

    // Neither path can touch the retired counter
    engine.release("gone");
    assert!(!handle.release());
    assert!(engine.registry().is_empty());
}

#[test]
fn test_sweeper_evicts_in_the_background() {
    let (clock, engine) = new_engine(EngineConfig::default());
    assert_eq!(engine.admit(&AdmissionParams::new("swept", 1.0)), Ok(ADMITTED));
    clock.advance(Duration::from_secs(5));

    let sweeper =
        EvictionSweeper::spawn(Arc::clone(&engine), Duration::from_millis(10), Duration::from_secs(1)).unwrap();
    assert!(eventually(Duration::from_secs(10), || engine.registry().is_empty()));
    sweeper.stop();
}

#[test]
fn test_sweeper_uses_engine_config() {
    let config = EngineConfig {
        counter_ttl_secs: 1,
        cleaner_period_secs: 1,
        ..EngineConfig::default()
    };
    let (clock, engine) = new_engine(config);
    assert_eq!(engine.admit(&AdmissionParams::new("configured", 1.0)), Ok(ADMITTED));
    clock.advance(Duration::from_secs(10));

    let sweeper = EvictionSweeper::spawn_from_config(Arc::clone(&engine)).unwrap();
    assert!(eventually(Duration::from_secs(15), || engine.registry().is_empty()));
    drop(sweeper);
}

#[test]
fn test_sweeper_stops_promptly() {
    let (_clock, engine) = new_engine(EngineConfig::default());

    // A long period: stopping must not wait for it to elapse
    let sweeper =
        EvictionSweeper::spawn(Arc::clone(&engine), Duration::from_secs(3600), Duration::from_secs(1)).unwrap();
    let started = Instant::now();
    sweeper.stop();
    assert!(started.elapsed() < Duration::from_secs(60));
}
