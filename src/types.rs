//! Time unit and decision types shared by every part of the admission engine.
//!
//! All timestamps are signed nanoseconds read from a [`ClockSource`](crate::clock::ClockSource).
//! They carry no calendar meaning: only differences between two readings of the
//! same clock are significant.

/// Monotonic timestamp or duration in nanoseconds.
///
/// Signed so that a clock anomaly (a reading earlier than a previous one)
/// shows up as a negative elapsed time instead of wrapping.
pub type Nanos = i64;

/// Nanoseconds in one second.
pub const NANOS_PER_SECOND: Nanos = 1_000_000_000;

/// Outcome of a single admission attempt.
///
/// The surrounding pipeline maps [`Decision::Admitted`] to "proceed" and any
/// [`Decision::Rejected`] to "service unavailable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// The unit of work may proceed.
    Admitted,
    /// The unit of work must not proceed.
    Rejected(Rejection),
}

impl Decision {
    /// Returns `true` for [`Decision::Admitted`].
    #[inline]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }

    /// Returns `true` for any [`Decision::Rejected`].
    #[inline]
    pub fn is_rejected(&self) -> bool {
        !self.is_admitted()
    }

    /// The rejection reason, if any.
    #[inline]
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Decision::Admitted => None,
            Decision::Rejected(reason) => Some(*reason),
        }
    }
}

/// Why an admission attempt was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Not enough points and shaping was not allowed.
    RateExceeded,
    /// The counter already has `max_concurrency` units of work in flight.
    ConcurrencyExceeded,
    /// The counter is inside a blackout period started by an earlier rate rejection.
    BlackedOut,
    /// Shaping was allowed but the node-wide sleep budget is used up.
    SleepBudgetExhausted,
    /// Shaping gave up after its retry count or total delay ceiling.
    ShapingDelayExceeded,
    /// The caller cancelled while the request was waiting for capacity.
    Interrupted,
}

impl core::fmt::Display for Rejection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use Rejection::*;
        match self {
            RateExceeded => write!(f, "rate limit exceeded"),
            ConcurrencyExceeded => write!(f, "concurrency limit exceeded"),
            BlackedOut => write!(f, "counter is blacked out due to a previous failure"),
            SleepBudgetExhausted => write!(f, "queued thread limit reached"),
            ShapingDelayExceeded => write!(f, "maximum delay reached"),
            Interrupted => write!(f, "interrupted while waiting for capacity"),
        }
    }
}

/// Converts a [`std::time::Duration`] to [`Nanos`], saturating at [`Nanos::MAX`].
#[inline]
pub fn duration_to_nanos(duration: std::time::Duration) -> Nanos {
    Nanos::try_from(duration.as_nanos()).unwrap_or(Nanos::MAX)
}
