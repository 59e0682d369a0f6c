//! Per-call admission parameters.

use std::time::Duration;

use crate::error::{AdmissionError, AdmissionResult};
use crate::types::{duration_to_nanos, Nanos, NANOS_PER_SECOND};

/// Limits applied to one admission attempt.
///
/// Parameters may differ from call to call. Every call naming the same
/// `counter_name` shares one counter, so two independently configured call
/// sites using the same name cooperate on one budget.
///
/// # Example
///
/// ```rust
/// use rate_guard_admission::AdmissionParams;
///
/// let params = AdmissionParams::new("orders", 25.0)
///     .max_concurrency(10)
///     .shape_requests(true);
/// assert!(params.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionParams {
    /// Name of the shared counter.
    pub counter_name: String,
    /// Sustained rate. Must be finite and greater than zero.
    pub max_requests_per_second: f64,
    /// In-flight cap for the counter; `0` means unlimited.
    pub max_concurrency: i64,
    /// Never shape: reject as soon as the rate is exceeded.
    pub hard_limit: bool,
    /// Delay over-rate requests until capacity frees up (unless `hard_limit`).
    pub shape_requests: bool,
    /// How much idle allowance may accumulate, as a span of time at the configured rate.
    pub window: Duration,
    /// After a rate rejection, reject everything for this long. Zero disables it.
    pub blackout: Duration,
    /// Report rate overruns but admit anyway.
    pub log_only: bool,
}

impl AdmissionParams {
    /// Parameters with a one-second burst window, no concurrency cap, no
    /// shaping, no blackout.
    pub fn new(counter_name: impl Into<String>, max_requests_per_second: f64) -> Self {
        Self {
            counter_name: counter_name.into(),
            max_requests_per_second,
            max_concurrency: 0,
            hard_limit: false,
            shape_requests: false,
            window: Duration::from_secs(1),
            blackout: Duration::ZERO,
            log_only: false,
        }
    }

    pub fn max_concurrency(mut self, max_concurrency: i64) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn hard_limit(mut self, hard_limit: bool) -> Self {
        self.hard_limit = hard_limit;
        self
    }

    pub fn shape_requests(mut self, shape_requests: bool) -> Self {
        self.shape_requests = shape_requests;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn blackout(mut self, blackout: Duration) -> Self {
        self.blackout = blackout;
        self
    }

    pub fn log_only(mut self, log_only: bool) -> Self {
        self.log_only = log_only;
        self
    }

    /// Checks the parameters for caller bugs.
    ///
    /// # Returns
    /// * `Err(AdmissionError::EmptyCounterName)` - no counter name
    /// * `Err(AdmissionError::InvalidRate)` - rate is zero, negative, NaN or infinite
    /// * `Err(AdmissionError::InvalidConcurrency)` - negative concurrency cap
    /// * `Err(AdmissionError::InvalidWindow)` - zero-length burst window
    pub fn validate(&self) -> AdmissionResult<()> {
        if self.counter_name.is_empty() {
            return Err(AdmissionError::EmptyCounterName);
        }
        let rate = self.max_requests_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(AdmissionError::InvalidRate(rate));
        }
        if self.max_concurrency < 0 {
            return Err(AdmissionError::InvalidConcurrency(self.max_concurrency));
        }
        if self.window.is_zero() {
            return Err(AdmissionError::InvalidWindow(self.window));
        }
        Ok(())
    }

    /// `true` when a concurrency cap is in force.
    #[inline]
    pub fn caps_concurrency(&self) -> bool {
        self.max_concurrency > 0
    }

    /// Shaping applies only when requested and not overridden by a hard limit or log-only mode.
    #[inline]
    pub fn shaping_enabled(&self) -> bool {
        self.shape_requests && !self.hard_limit && !self.log_only
    }

    /// Most points the bucket may hold: never less than one.
    #[inline]
    pub fn burst_ceiling(&self) -> f64 {
        (self.max_requests_per_second * self.window.as_secs_f64()).max(1.0)
    }

    #[inline]
    pub(crate) fn blackout_nanos(&self) -> Nanos {
        duration_to_nanos(self.blackout)
    }

    /// Nanoseconds until `deficit` points have accrued, rounded up.
    #[inline]
    pub(crate) fn nanos_to_accrue(&self, deficit: f64) -> Nanos {
        let nanos = (deficit * NANOS_PER_SECOND as f64 / self.max_requests_per_second).ceil();
        if nanos.is_finite() {
            // `as` saturates for out-of-range floats.
            (nanos as Nanos).max(1)
        } else {
            Nanos::MAX
        }
    }
}
