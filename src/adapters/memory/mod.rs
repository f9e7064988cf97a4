//! In-memory adapters for every storage and collaborator port.
//!
//! Used by tests and by development mode when no database is configured.

mod audit_log;
mod notification;
mod record_store;
mod subscription_store;
mod user_directory;

pub use audit_log::InMemoryAuditLog;
pub use notification::RecordingNotificationGateway;
pub use record_store::InMemoryDunningRecordStore;
pub use subscription_store::InMemorySubscriptionStore;
pub use user_directory::InMemoryUserDirectory;
