//! In-memory AuditLog.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

use crate::domain::dunning::{AuditAction, AuditEntry};
use crate::domain::foundation::{DomainError, DunningRecordId, EventId};
use crate::ports::{AppendResult, AuditLog};

#[derive(Default)]
struct Inner {
    entries: Vec<AuditEntry>,
    event_ids: HashSet<EventId>,
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    inner: RwLock<Inner>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry, in append order.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.inner.read().await.entries.clone()
    }

    /// Number of entries with the given action.
    pub async fn count_action(&self, action: AuditAction) -> usize {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.action == action)
            .count()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<AppendResult, DomainError> {
        let mut inner = self.inner.write().await;
        if let Some(event_id) = &entry.event_id {
            if !inner.event_ids.insert(event_id.clone()) {
                return Ok(AppendResult::DuplicateEvent);
            }
        }
        inner.entries.push(entry.clone());
        Ok(AppendResult::Appended)
    }

    async fn exists_for_event(&self, event_id: &EventId) -> Result<bool, DomainError> {
        Ok(self.inner.read().await.event_ids.contains(event_id))
    }

    async fn list_for_record(
        &self,
        record_id: &DunningRecordId,
    ) -> Result<Vec<AuditEntry>, DomainError> {
        Ok(self
            .inner
            .read()
            .await
            .entries
            .iter()
            .filter(|e| &e.dunning_record_id == record_id)
            .cloned()
            .collect())
    }
}
