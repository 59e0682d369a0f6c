use parking_lot::{Mutex, MutexGuard};

use crate::params::AdmissionParams;
use crate::types::{Nanos, NANOS_PER_SECOND};

/// Token-bucket state for one counter name.
///
/// Holds fractional "points" that accrue at the configured rate up to a burst
/// ceiling, the number of in-flight units of work admitted under a concurrency
/// cap, and the end of any blackout period. Every read and write happens under
/// the counter's own lock, so unrelated counters never contend.
///
/// # Example
///
/// ```rust
/// use rate_guard_admission::cores::CounterState;
///
/// let counter = CounterState::new("orders", 0);
/// assert_eq!(counter.key(), "orders");
/// assert_eq!(counter.concurrent(), 0);
/// ```
#[derive(Debug)]
pub struct CounterState {
    /// Name the counter is registered under.
    key: String,
    /// Mutable state, only touched while holding this lock.
    state: Mutex<CounterFields>,
}

/// Mutable fields of a [`CounterState`].
#[derive(Debug)]
pub(crate) struct CounterFields {
    /// Clock reading at the last point accrual.
    pub(crate) last_update_nanos: Nanos,
    /// Accumulated allowance, kept within `[0, burst ceiling]`.
    pub(crate) points: f64,
    /// Units of work admitted under a concurrency cap and not yet released.
    pub(crate) concurrent: u64,
    /// Admissions are refused until the clock reaches this reading.
    pub(crate) blackout_until: Option<Nanos>,
    /// `false` until the first accrual, which fills the bucket.
    primed: bool,
    /// Rate used by the last accrual, for side-effect-free queries.
    last_rate: f64,
    /// Burst ceiling used by the last accrual.
    last_ceiling: f64,
    /// Set when the registry drops this counter. A retired counter must not be mutated.
    pub(crate) retired: bool,
}

/// Point-in-time view of a counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSnapshot {
    /// Whole requests that could be admitted right now on rate alone.
    pub requests_remaining: u64,
    /// Fractional points as of the snapshot time.
    pub points: f64,
    /// Units of work in flight.
    pub concurrent: u64,
    /// Whether a blackout is in force at the snapshot time.
    pub blacked_out: bool,
    /// Clock reading at the last accrual.
    pub last_update_nanos: Nanos,
}

impl CounterState {
    /// Creates an idle counter. Its bucket fills on first use.
    pub fn new(key: impl Into<String>, created_nanos: Nanos) -> Self {
        CounterState {
            key: key.into(),
            state: Mutex::new(CounterFields {
                last_update_nanos: created_nanos,
                points: 0.0,
                concurrent: 0,
                blackout_until: None,
                primed: false,
                last_rate: 0.0,
                last_ceiling: 1.0,
                retired: false,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, CounterFields> {
        self.state.lock()
    }

    /// Units of work currently in flight.
    pub fn concurrent(&self) -> u64 {
        self.state.lock().concurrent
    }

    /// Clock reading at the last point accrual.
    pub fn last_update_nanos(&self) -> Nanos {
        self.state.lock().last_update_nanos
    }

    /// Points as of the last accrual.
    pub fn points(&self) -> f64 {
        self.state.lock().points
    }

    /// Whether the registry has already dropped this counter.
    pub fn is_retired(&self) -> bool {
        self.state.lock().retired
    }

    /// Frees one concurrency slot, never going below zero.
    ///
    /// Returns `false` if the counter was retired and nothing was changed.
    pub fn release(&self) -> bool {
        let mut state = self.state.lock();
        if state.retired {
            return false;
        }
        state.concurrent = state.concurrent.saturating_sub(1);
        true
    }

    /// Describes the counter as of `now` without changing it.
    pub fn snapshot(&self, now: Nanos) -> CounterSnapshot {
        let state = self.state.lock();
        let points = state.points_at(now);
        CounterSnapshot {
            requests_remaining: points.floor() as u64,
            points,
            concurrent: state.concurrent,
            blacked_out: state.is_blacked_out(now),
            last_update_nanos: state.last_update_nanos,
        }
    }

    /// Marks the counter retired if it has been idle since before `cutoff` and
    /// has nothing in flight.
    ///
    /// Returns `true` if the counter was retired by this call.
    pub(crate) fn try_retire(&self, cutoff: Nanos) -> bool {
        let mut state = self.state.lock();
        if state.retired || state.concurrent > 0 || state.last_update_nanos >= cutoff {
            return false;
        }
        state.retired = true;
        true
    }
}

impl CounterFields {
    /// Adds the points earned since the last update and moves the timestamp to `now`.
    ///
    /// A negative elapsed time (clock anomaly) adds nothing, and accrual
    /// restarts from the earlier reading. The increment is clamped to the ceiling before
    /// it is added, so very high rates never depend on floating-point
    /// accumulation.
    pub(crate) fn accrue(&mut self, now: Nanos, params: &AdmissionParams) {
        let ceiling = params.burst_ceiling();
        self.last_rate = params.max_requests_per_second;
        self.last_ceiling = ceiling;

        if !self.primed {
            self.primed = true;
            self.points = ceiling;
            self.last_update_nanos = now;
            return;
        }

        let elapsed = now.saturating_sub(self.last_update_nanos);
        if elapsed < 0 {
            tracing::warn!(elapsed, "clock moved backwards; treating elapsed time as zero");
        }
        let points_to_add = points_for(elapsed.max(0), params.max_requests_per_second, ceiling);

        self.points = (self.points + points_to_add).clamp(0.0, ceiling);
        self.last_update_nanos = now;
    }

    /// Points the bucket would hold at `now` under the last-used rate.
    fn points_at(&self, now: Nanos) -> f64 {
        if !self.primed {
            return 0.0;
        }
        let ceiling = self.last_ceiling;
        let elapsed = now.saturating_sub(self.last_update_nanos).max(0);
        (self.points + points_for(elapsed, self.last_rate, ceiling)).clamp(0.0, ceiling)
    }

    #[inline]
    pub(crate) fn is_blacked_out(&self, now: Nanos) -> bool {
        matches!(self.blackout_until, Some(until) if now < until)
    }
}

/// Points earned over `elapsed` nanoseconds, never more than `ceiling`.
fn points_for(elapsed: Nanos, rate: f64, ceiling: f64) -> f64 {
    let points = elapsed as f64 * rate / NANOS_PER_SECOND as f64;
    if points.is_finite() {
        points.min(ceiling)
    } else {
        ceiling
    }
}
