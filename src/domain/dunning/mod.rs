//! Dunning domain: the failed-payment recovery workflow.
//!
//! - `DunningStage` - the linear stage machine
//! - `DunningRecord` - per-subscription recovery state
//! - `StagePolicy` - pure scheduling rules
//! - `AuditEntry` - append-only trail, also the webhook dedupe ledger

mod audit;
mod errors;
mod policy;
mod record;
mod stage;

pub use audit::{Actor, AuditAction, AuditEntry};
pub use errors::DunningError;
pub use policy::{NextAction, StageOffsets, StagePolicy};
pub use record::{DunningMetadata, DunningRecord, OpenDunningRecord, Resolution};
pub use stage::DunningStage;
