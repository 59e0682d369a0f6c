//! The admission decision: token-bucket rate limiting, concurrency caps and
//! bounded request shaping, per counter name.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{CancelToken, ClockSource, MonotonicClock};
use crate::config::EngineConfig;
use crate::cores::{CounterRegistry, CounterSnapshot, CounterState, SleepThreadBudget};
use crate::error::AdmissionResult;
use crate::params::AdmissionParams;
use crate::types::{duration_to_nanos, Decision, Nanos, Rejection};

/// Decides whether each inbound unit of work may proceed.
///
/// For every call the engine resolves the named counter, accrues the points
/// earned since its last use, and then, under that counter's lock only:
///
/// 1. rejects if the counter is blacked out,
/// 2. rejects if the concurrency cap is full (never shaped),
/// 3. admits and consumes a point if one is available,
/// 4. otherwise admits anyway in log-only mode, rejects when shaping is off or
///    a hard limit is set, or releases the lock and sleeps until a point should
///    have accrued, then starts over.
///
/// Sleeping is bounded three ways: by the node-wide [`SleepThreadBudget`], by
/// a retry count and by a total delay ceiling, both from [`EngineConfig`].
///
/// # Example
///
/// ```rust
/// use rate_guard_admission::{AdmissionEngine, AdmissionParams, EngineConfig};
/// use rate_guard_admission::clock::{SleepMode, VirtualClock};
/// use std::sync::Arc;
///
/// let clock = Arc::new(VirtualClock::new(SleepMode::Fail));
/// let engine = AdmissionEngine::with_clock(EngineConfig::default(), Arc::clone(&clock));
/// let params = AdmissionParams::new("orders", 3.0);
///
/// for _ in 0..3 {
///     assert!(engine.admit(&params).unwrap().is_admitted());
/// }
/// assert!(engine.admit(&params).unwrap().is_rejected());
///
/// clock.advance_millis(1001);
/// assert!(engine.admit(&params).unwrap().is_admitted());
/// ```
#[derive(Debug)]
pub struct AdmissionEngine<C: ClockSource = MonotonicClock> {
    clock: C,
    registry: Arc<CounterRegistry>,
    budget: Arc<SleepThreadBudget>,
    config: EngineConfig,
}

/// Result of one locked evaluation of a counter.
enum Step {
    Done(Decision),
    /// Shaping: sleep this many nanoseconds, then evaluate again.
    Wait(Nanos),
    /// The counter was evicted after it was looked up; resolve the key again.
    Retired,
}

impl AdmissionEngine<MonotonicClock> {
    /// An engine on the system monotonic clock.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl Default for AdmissionEngine<MonotonicClock> {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl<C: ClockSource> AdmissionEngine<C> {
    /// An engine with its own registry and sleep budget, driven by `clock`.
    pub fn with_clock(config: EngineConfig, clock: C) -> Self {
        let budget = Arc::new(SleepThreadBudget::new(config.max_sleep_threads));
        Self::with_parts(config, clock, Arc::new(CounterRegistry::new()), budget)
    }

    /// An engine over an existing registry and sleep budget.
    ///
    /// Engines built from the same parts share counters and the sleep cap.
    /// `config.max_sleep_threads` is ignored here; the budget keeps its own maximum.
    pub fn with_parts(
        config: EngineConfig,
        clock: C,
        registry: Arc<CounterRegistry>,
        budget: Arc<SleepThreadBudget>,
    ) -> Self {
        AdmissionEngine {
            clock,
            registry,
            budget,
            config,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<CounterRegistry> {
        &self.registry
    }

    pub fn sleep_budget(&self) -> &Arc<SleepThreadBudget> {
        &self.budget
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decides one unit of work. May block while shaping.
    ///
    /// # Returns
    /// * `Ok(Decision::Admitted)` - proceed; call [`release`](Self::release) afterwards
    ///   if `max_concurrency` was non-zero
    /// * `Ok(Decision::Rejected(_))` - do not proceed
    /// * `Err(AdmissionError)` - the parameters are invalid
    pub fn admit(&self, params: &AdmissionParams) -> AdmissionResult<Decision> {
        self.admit_cancellable(params, &CancelToken::new())
    }

    /// Positional form of [`admit`](Self::admit) with a one-second burst window.
    pub fn admit_key(
        &self,
        key: &str,
        max_requests_per_second: f64,
        max_concurrency: i64,
        hard_limit: bool,
        shape_requests: bool,
    ) -> AdmissionResult<Decision> {
        let params = AdmissionParams::new(key, max_requests_per_second)
            .max_concurrency(max_concurrency)
            .hard_limit(hard_limit)
            .shape_requests(shape_requests);
        self.admit(&params)
    }

    /// Like [`admit`](Self::admit), but a shaping sleep ends early with
    /// [`Rejection::Interrupted`] once `cancel` fires. The token is left
    /// cancelled.
    pub fn admit_cancellable(
        &self,
        params: &AdmissionParams,
        cancel: &CancelToken,
    ) -> AdmissionResult<Decision> {
        params.validate()?;

        let key = params.counter_name.as_str();
        let max_delay = duration_to_nanos(self.config.max_shaping_delay());
        let mut sleeps: u32 = 0;
        let mut slept: Nanos = 0;

        loop {
            let now = self.clock.nano_time();
            let counter = self.registry.get_or_create(key, now);
            let wait = match evaluate(&counter, params, now) {
                Step::Done(decision) => return Ok(decision),
                Step::Retired => continue,
                Step::Wait(wait) => wait,
            };

            if sleeps >= self.config.max_shaping_retries || slept.saturating_add(wait) > max_delay {
                info!(counter = key, sleeps, slept_nanos = slept, "unable to further delay request: maximum delay reached");
                return Ok(Decision::Rejected(Rejection::ShapingDelayExceeded));
            }
            if cancel.is_cancelled() {
                return Ok(Decision::Rejected(Rejection::Interrupted));
            }

            let Some(permit) = self.budget.try_acquire() else {
                info!(
                    counter = key,
                    max_sleep_threads = self.budget.max(),
                    "unable to delay request: queued thread limit reached"
                );
                return Ok(Decision::Rejected(Rejection::SleepBudgetExhausted));
            };

            debug!(counter = key, wait_nanos = wait, attempt = sleeps + 1, "delaying request for shaping");
            let woke = self.clock.sleep(wait, cancel);
            drop(permit);

            if woke.is_err() {
                info!(counter = key, "shaping sleep interrupted");
                return Ok(Decision::Rejected(Rejection::Interrupted));
            }
            sleeps += 1;
            slept = slept.saturating_add(wait);
        }
    }

    /// Frees the concurrency slot taken by an admitted unit of work.
    ///
    /// Must be called exactly once for every admission made with a non-zero
    /// `max_concurrency`, including on error paths. Unknown keys are ignored.
    pub fn release(&self, key: &str) {
        match self.registry.get(key) {
            Some(counter) => {
                if !counter.release() {
                    debug!(counter = key, "release ignored for evicted counter");
                }
            }
            None => debug!(counter = key, "release ignored for unknown counter"),
        }
    }

    /// Changes the node-wide sleeper cap. Takes effect on the next shaping attempt.
    pub fn set_max_sleep_threads(&self, max_sleep_threads: usize) {
        self.budget.set_max(max_sleep_threads);
    }

    /// Requests currently sleeping in the shaper.
    pub fn sleepers_in_flight(&self) -> usize {
        self.budget.in_flight()
    }

    /// Drops counters idle for longer than `ttl` with nothing in flight.
    ///
    /// Returns the number removed.
    pub fn evict_stale(&self, ttl: Duration) -> usize {
        self.registry.evict_stale(ttl, self.clock.nano_time())
    }

    /// Reports a counter's state without creating or changing it.
    pub fn query(&self, key: &str) -> Option<CounterSnapshot> {
        let now = self.clock.nano_time();
        self.registry.get(key).map(|counter| counter.snapshot(now))
    }
}

/// One accrue/check/consume pass over `counter`, under its lock.
fn evaluate(counter: &CounterState, params: &AdmissionParams, now: Nanos) -> Step {
    let key = counter.key();
    let mut state = counter.lock();
    if state.retired {
        return Step::Retired;
    }

    state.accrue(now, params);

    if state.is_blacked_out(now) {
        info!(counter = key, "failing request because counter is blacked out due to previous failure");
        return Step::Done(Decision::Rejected(Rejection::BlackedOut));
    }

    let caps_concurrency = params.caps_concurrency();
    if caps_concurrency && state.concurrent >= params.max_concurrency as u64 {
        info!(
            counter = key,
            concurrent = state.concurrent,
            max_concurrency = params.max_concurrency,
            "concurrency exceeded"
        );
        return Step::Done(Decision::Rejected(Rejection::ConcurrencyExceeded));
    }

    if state.points >= 1.0 {
        state.points -= 1.0;
        if caps_concurrency {
            state.concurrent += 1;
        }
        return Step::Done(Decision::Admitted);
    }

    if params.log_only {
        warn!(counter = key, points = state.points, "rate limit exceeded; admitting in log-only mode");
        if caps_concurrency {
            state.concurrent += 1;
        }
        return Step::Done(Decision::Admitted);
    }

    if !params.shaping_enabled() {
        info!(counter = key, points = state.points, "rate limit exceeded");
        if !params.blackout.is_zero() {
            state.blackout_until = Some(now.saturating_add(params.blackout_nanos()));
        }
        return Step::Done(Decision::Rejected(Rejection::RateExceeded));
    }

    Step::Wait(params.nanos_to_accrue(1.0 - state.points))
}
