//! Per-key state primitives the admission engine is built from.
//!
//! Each primitive is thread-safe on its own and usable without the engine.
//!
//! - **[`CounterState`]** - token-bucket points, in-flight count and blackout for one key
//! - **[`CounterRegistry`]** - creates counters on first use and evicts idle ones
//! - **[`SleepThreadBudget`]** - node-wide cap on requests sleeping in the shaper
//!
//! # Locking
//!
//! | Primitive | Guard | Held for |
//! |-----------|-------|----------|
//! | CounterState | per-counter mutex | one accrue/check/consume step, never across a sleep |
//! | CounterRegistry | sharded map lock | one lookup or insert |
//! | SleepThreadBudget | none (atomics) | - |
//!
//! No code path takes a map shard lock while holding a counter lock, so the
//! two cannot deadlock.

pub mod counter_state;
pub use counter_state::CounterSnapshot;
pub use counter_state::CounterState;

pub mod counter_registry;
pub use counter_registry::CounterRegistry;

pub mod sleep_budget;
pub use sleep_budget::SleepPermit;
pub use sleep_budget::SleepThreadBudget;
