//! Pluggable time source for the admission engine.
//!
//! The engine never reads the system clock directly. It asks a [`ClockSource`]
//! for the current monotonic time and for a cancellable sleep, which lets tests
//! swap in a [`VirtualClock`] that only moves when told to.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::types::{duration_to_nanos, Nanos};

/// How often a virtual-clock sleeper parked at the gate re-checks its cancel token.
const GATE_CANCEL_POLL: Duration = Duration::from_millis(1);

/// A sleep ended early because the caller's [`CancelToken`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sleep interrupted by cancellation")]
pub struct SleepInterrupted;

/// Monotonic time plus a blocking, cancellable sleep.
///
/// Implementations must be shareable across threads: one clock serves every
/// admission call in the process (or in one test).
pub trait ClockSource: Send + Sync {
    /// Current monotonic time in nanoseconds. Only differences are meaningful.
    fn nano_time(&self) -> Nanos;

    /// Blocks the calling thread for `nanos` nanoseconds.
    ///
    /// # Returns
    /// * `Ok(())` once the full duration has passed
    /// * `Err(SleepInterrupted)` if `cancel` fired before or during the sleep
    fn sleep(&self, nanos: Nanos, cancel: &CancelToken) -> Result<(), SleepInterrupted>;
}

/// Cooperative cancellation handle shared between a caller and the engine.
///
/// Cloning yields another handle to the same flag. Once cancelled a token
/// stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: Mutex<bool>,
    cvar: Condvar,
}

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every thread waiting on it.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Blocks for up to `timeout`, returning early if the token is cancelled.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            match deadline {
                Some(deadline) => {
                    if self.inner.cvar.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.cvar.wait(&mut cancelled),
            }
        }
        *cancelled
    }
}

/// Production clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    #[inline]
    fn nano_time(&self) -> Nanos {
        duration_to_nanos(self.origin.elapsed())
    }

    fn sleep(&self, nanos: Nanos, cancel: &CancelToken) -> Result<(), SleepInterrupted> {
        let duration = Duration::from_nanos(u64::try_from(nanos).unwrap_or(0));
        if cancel.wait_for(duration) {
            Err(SleepInterrupted)
        } else {
            Ok(())
        }
    }
}

/// What a [`VirtualClock`] does when someone sleeps on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepMode {
    /// Panic: the test did not expect any request to be shaped.
    Fail,
    /// Advance the clock by the requested duration and return at once.
    /// Suited to single-threaded simulations.
    Advance,
    /// Park the sleeper until [`VirtualClock::open_gate`] is called or its
    /// cancel token fires. Suited to multi-threaded simulations.
    Gate,
}

/// Manually driven clock for deterministic tests.
///
/// Time only moves through [`advance`](VirtualClock::advance) and friends, or
/// through sleeps in [`SleepMode::Advance`].
///
/// # Example
///
/// ```rust
/// use rate_guard_admission::clock::{ClockSource, SleepMode, VirtualClock};
/// use std::time::Duration;
///
/// let clock = VirtualClock::new(SleepMode::Advance);
/// let start = clock.nano_time();
/// clock.advance(Duration::from_millis(1001));
/// assert_eq!(clock.nano_time() - start, 1_001_000_000);
/// ```
#[derive(Debug)]
pub struct VirtualClock {
    now: AtomicI64,
    mode: Mutex<SleepMode>,
    gate: Mutex<GateState>,
    gate_cvar: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    /// Bumped by every `open_gate`; sleepers leave once it differs from what they saw.
    generation: u64,
    sleepers: usize,
}

impl VirtualClock {
    /// A clock reading zero.
    pub fn new(mode: SleepMode) -> Self {
        Self::starting_at(0, mode)
    }

    pub fn starting_at(start: Nanos, mode: SleepMode) -> Self {
        Self {
            now: AtomicI64::new(start),
            mode: Mutex::new(mode),
            gate: Mutex::new(GateState::default()),
            gate_cvar: Condvar::new(),
        }
    }

    pub fn set_sleep_mode(&self, mode: SleepMode) {
        *self.mode.lock() = mode;
    }

    pub fn sleep_mode(&self) -> SleepMode {
        *self.mode.lock()
    }

    pub fn advance(&self, by: Duration) {
        self.advance_nanos(duration_to_nanos(by));
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Moves the clock by `nanos`. Negative values move it backwards, which
    /// simulates a clock anomaly.
    pub fn advance_nanos(&self, nanos: Nanos) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| Some(now.saturating_add(nanos)));
    }

    /// Releases every thread currently parked at the gate.
    ///
    /// Threads that sleep after this call park again until the next one.
    pub fn open_gate(&self) {
        let mut gate = self.gate.lock();
        gate.generation = gate.generation.wrapping_add(1);
        self.gate_cvar.notify_all();
    }

    /// Number of threads currently parked at the gate.
    pub fn sleepers(&self) -> usize {
        self.gate.lock().sleepers
    }

    /// Waits until at least `count` threads are parked at the gate.
    ///
    /// Returns `false` if that did not happen within `timeout` (real time).
    pub fn wait_for_sleepers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut gate = self.gate.lock();
        while gate.sleepers < count {
            match deadline {
                Some(deadline) => {
                    if self.gate_cvar.wait_until(&mut gate, deadline).timed_out() {
                        return gate.sleepers >= count;
                    }
                }
                None => self.gate_cvar.wait(&mut gate),
            }
        }
        true
    }

    fn wait_at_gate(&self, cancel: &CancelToken) -> Result<(), SleepInterrupted> {
        let mut gate = self.gate.lock();
        let entered = gate.generation;
        gate.sleepers += 1;
        self.gate_cvar.notify_all();

        let result = loop {
            if gate.generation != entered {
                break Ok(());
            }
            if cancel.is_cancelled() {
                break Err(SleepInterrupted);
            }
            self.gate_cvar.wait_for(&mut gate, GATE_CANCEL_POLL);
        };

        gate.sleepers -= 1;
        self.gate_cvar.notify_all();
        result
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(SleepMode::Fail)
    }
}

impl ClockSource for VirtualClock {
    #[inline]
    fn nano_time(&self) -> Nanos {
        self.now.load(Ordering::SeqCst)
    }

    /// # Panics
    /// Panics in [`SleepMode::Fail`]; that mode exists to abort a test that
    /// shaped a request it should not have.
    fn sleep(&self, nanos: Nanos, cancel: &CancelToken) -> Result<(), SleepInterrupted> {
        if cancel.is_cancelled() {
            return Err(SleepInterrupted);
        }
        let mode = self.sleep_mode();
        match mode {
            SleepMode::Fail => {
                tracing::warn!(nanos, "unexpected sleep on virtual clock");
                panic!("unexpected sleep for {nanos}ns on a virtual clock in SleepMode::Fail");
            }
            SleepMode::Advance => {
                self.advance_nanos(nanos.max(0));
                Ok(())
            }
            SleepMode::Gate => self.wait_at_gate(cancel),
        }
    }
}

impl<C: ClockSource + ?Sized> ClockSource for Arc<C> {
    #[inline]
    fn nano_time(&self) -> Nanos {
        (**self).nano_time()
    }

    #[inline]
    fn sleep(&self, nanos: Nanos, cancel: &CancelToken) -> Result<(), SleepInterrupted> {
        (**self).sleep(nanos, cancel)
    }
}
