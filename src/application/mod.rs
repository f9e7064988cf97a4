//! Application layer - engine, scheduler, and handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Writes go through the `DunningEngine`; admin reads go straight to the
//! record store.

pub mod dunning_engine;
pub mod handlers;
pub mod keyed_lock;
pub mod scheduler;

pub use dunning_engine::{
    AdvanceOutcome, AdvanceTrigger, DunningEngine, PaymentFailedCommand, PaymentFailedOutcome,
    PaymentRecoveredOutcome,
};
pub use keyed_lock::{KeyedLockGuard, KeyedLocks};
pub use scheduler::{RunSummary, Scheduler, SchedulerConfig, SchedulerState};
