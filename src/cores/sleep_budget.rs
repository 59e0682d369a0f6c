use std::sync::atomic::{AtomicUsize, Ordering};

/// Node-wide cap on how many requests may sleep in the shaper at once.
///
/// Not partitioned per counter: this is a backpressure valve protecting the
/// whole node from unbounded numbers of parked threads.
///
/// # Example
///
/// ```rust
/// use rate_guard_admission::cores::SleepThreadBudget;
///
/// let budget = SleepThreadBudget::new(1);
/// assert!(budget.try_reserve());
/// assert!(!budget.try_reserve());
/// budget.release();
/// assert!(budget.try_reserve());
/// ```
#[derive(Debug)]
pub struct SleepThreadBudget {
    /// Reservations currently held.
    in_flight: AtomicUsize,
    /// Upper bound on `in_flight`, changeable at runtime.
    max: AtomicUsize,
}

impl SleepThreadBudget {
    pub fn new(max_sleep_threads: usize) -> Self {
        SleepThreadBudget {
            in_flight: AtomicUsize::new(0),
            max: AtomicUsize::new(max_sleep_threads),
        }
    }

    /// Takes one unit if fewer than the maximum are held. Never blocks.
    #[inline]
    pub fn try_reserve(&self) -> bool {
        let max = self.max.load(Ordering::Acquire);
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < max).then_some(held + 1)
            })
            .is_ok()
    }

    /// Like [`try_reserve`](Self::try_reserve), returning a guard that releases on drop.
    pub fn try_acquire(&self) -> Option<SleepPermit<'_>> {
        self.try_reserve().then_some(SleepPermit { budget: self })
    }

    /// Gives back one unit, never going below zero.
    #[inline]
    pub fn release(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| held.checked_sub(1));
    }

    /// Changes the maximum. Takes effect on the next reservation; current
    /// holders are not disturbed even if they now exceed it.
    pub fn set_max(&self, max_sleep_threads: usize) {
        self.max.store(max_sleep_threads, Ordering::Release);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::Acquire)
    }

    /// Reservations currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// One reserved unit of a [`SleepThreadBudget`], released on drop.
#[derive(Debug)]
pub struct SleepPermit<'a> {
    budget: &'a SleepThreadBudget,
}

impl Drop for SleepPermit<'_> {
    fn drop(&mut self) {
        self.budget.release();
    }
}
