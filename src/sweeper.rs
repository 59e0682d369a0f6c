//! Background thread that evicts idle counters on a fixed period.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::{CancelToken, ClockSource};
use crate::engine::AdmissionEngine;

/// The single maintenance task calling [`AdmissionEngine::evict_stale`].
///
/// Stops when [`stop`](Self::stop) is called or the sweeper is dropped.
///
/// # Example
///
/// ```rust
/// use rate_guard_admission::{AdmissionEngine, EngineConfig, EvictionSweeper};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let engine = Arc::new(AdmissionEngine::new(EngineConfig::default()));
/// let sweeper = EvictionSweeper::spawn(engine, Duration::from_secs(180), Duration::from_secs(600)).unwrap();
/// sweeper.stop();
/// ```
#[derive(Debug)]
pub struct EvictionSweeper {
    stop: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl EvictionSweeper {
    /// Starts sweeping every `period` (real time), evicting counters idle for
    /// longer than `ttl` (engine clock time).
    pub fn spawn<C>(engine: Arc<AdmissionEngine<C>>, period: Duration, ttl: Duration) -> std::io::Result<Self>
    where
        C: ClockSource + 'static,
    {
        let stop = CancelToken::new();
        let stop_signal = stop.clone();
        let handle = thread::Builder::new()
            .name("rate-guard-sweeper".to_string())
            .spawn(move || {
                tracing::debug!(?period, ?ttl, "counter sweeper started");
                while !stop_signal.wait_for(period) {
                    engine.evict_stale(ttl);
                }
                tracing::debug!("counter sweeper stopped");
            })?;
        Ok(EvictionSweeper {
            stop,
            handle: Some(handle),
        })
    }

    /// Starts sweeping with the period and TTL from the engine's configuration.
    pub fn spawn_from_config<C>(engine: Arc<AdmissionEngine<C>>) -> std::io::Result<Self>
    where
        C: ClockSource + 'static,
    {
        let period = engine.config().cleaner_period();
        let ttl = engine.config().counter_ttl();
        Self::spawn(engine, period, ttl)
    }

    /// Signals the thread and waits for it to finish its current sweep.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("counter sweeper thread panicked");
            }
        }
    }
}

impl Drop for EvictionSweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
