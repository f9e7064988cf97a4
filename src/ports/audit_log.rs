//! AuditLog port - append-only trail of dunning changes.
//!
//! The log doubles as the idempotency ledger for gateway events: an entry
//! carrying an `event_id` means that event has been fully handled. Stores
//! must enforce uniqueness of `event_id` so two concurrent deliveries of
//! the same event cannot both append.

use async_trait::async_trait;

use crate::domain::dunning::AuditEntry;
use crate::domain::foundation::{DomainError, DunningRecordId, EventId};

/// Result of appending an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    Appended,
    /// An entry for the same `event_id` already exists; nothing was written.
    DuplicateEvent,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<AppendResult, DomainError>;

    /// Returns true if any entry carries this event id.
    async fn exists_for_event(&self, event_id: &EventId) -> Result<bool, DomainError>;

    /// Entries for one record in the order they were written.
    async fn list_for_record(
        &self,
        record_id: &DunningRecordId,
    ) -> Result<Vec<AuditEntry>, DomainError>;
}
