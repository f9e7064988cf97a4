//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Storage Ports
//!
//! - `DunningRecordStore` - per-subscription recovery state with CAS updates
//! - `AuditLog` - append-only trail and webhook dedupe ledger
//!
//! ## Collaborator Ports
//!
//! - `NotificationGateway` - stage notifications to end users
//! - `SubscriptionStore` - subscription status writes
//! - `UserDirectory` - display fields and role downgrade
//!
//! ## Runtime Ports
//!
//! - `Clock` - injected time source
//! - `SessionValidator` - operator token validation

mod audit_log;
mod clock;
mod dunning_record_store;
mod notification_gateway;
mod session_validator;
mod subscription_store;
mod user_directory;

pub use audit_log::{AppendResult, AuditLog};
pub use clock::Clock;
pub use dunning_record_store::{
    DunningRecordStore, DunningStats, InsertResult, ListFilter, Page, RecordPage, UpdateResult,
};
pub use notification_gateway::{Notification, NotificationGateway};
pub use session_validator::SessionValidator;
pub use subscription_store::{SubscriptionStatus, SubscriptionStore};
pub use user_directory::{UserDirectory, UserProfile};
