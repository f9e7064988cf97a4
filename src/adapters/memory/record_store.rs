//! In-memory DunningRecordStore.
//!
//! Same semantics as the PostgreSQL adapter, including the version check
//! and the one-active-record-per-subscription rule. Used by tests and by
//! development mode when no database is configured.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::dunning::DunningRecord;
use crate::domain::foundation::{DomainError, DunningRecordId, SubscriptionId, Timestamp};
use crate::ports::{
    DunningRecordStore, DunningStats, InsertResult, ListFilter, Page, RecordPage, UpdateResult,
};

#[derive(Default)]
struct Inner {
    records: HashMap<DunningRecordId, DunningRecord>,
    /// Insertion sequence, for stable newest-first ordering.
    order: HashMap<DunningRecordId, u64>,
    next_seq: u64,
}

impl Inner {
    fn seq(&self, id: &DunningRecordId) -> u64 {
        self.order.get(id).copied().unwrap_or_default()
    }

    fn newest_first(&self) -> Vec<&DunningRecord> {
        let mut all: Vec<&DunningRecord> = self.records.values().collect();
        all.sort_by_key(|r| std::cmp::Reverse(self.seq(&r.id)));
        all
    }
}

#[derive(Default)]
pub struct InMemoryDunningRecordStore {
    inner: RwLock<Inner>,
}

impl InMemoryDunningRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, archived included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All records for a subscription, newest first.
    pub async fn all_for_subscription(&self, subscription_id: &SubscriptionId) -> Vec<DunningRecord> {
        let inner = self.inner.read().await;
        inner
            .newest_first()
            .into_iter()
            .filter(|r| &r.subscription_id == subscription_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DunningRecordStore for InMemoryDunningRecordStore {
    async fn insert(&self, record: &DunningRecord) -> Result<InsertResult, DomainError> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .records
            .values()
            .find(|r| r.subscription_id == record.subscription_id && r.is_active())
        {
            return Ok(InsertResult::ActiveExists(existing.id));
        }

        let mut stored = record.clone();
        stored.version = 1;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(stored.id, seq);
        inner.records.insert(stored.id, stored);
        Ok(InsertResult::Inserted)
    }

    async fn find_by_id(&self, id: &DunningRecordId) -> Result<Option<DunningRecord>, DomainError> {
        Ok(self.inner.read().await.records.get(id).cloned())
    }

    async fn find_active_by_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<DunningRecord>, DomainError> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .values()
            .find(|r| &r.subscription_id == subscription_id && r.is_active())
            .cloned())
    }

    async fn find_latest_by_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<DunningRecord>, DomainError> {
        let inner = self.inner.read().await;
        Ok(inner
            .newest_first()
            .into_iter()
            .find(|r| &r.subscription_id == subscription_id)
            .cloned())
    }

    async fn update(&self, record: &DunningRecord) -> Result<UpdateResult, DomainError> {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(&record.id) {
            Some(stored) if stored.version == record.version => {
                let version = record.version + 1;
                *stored = record.clone();
                stored.version = version;
                Ok(UpdateResult::Updated { version })
            }
            _ => Ok(UpdateResult::Conflict),
        }
    }

    async fn find_due(&self, now: Timestamp, limit: u32) -> Result<Vec<DunningRecord>, DomainError> {
        let inner = self.inner.read().await;
        let mut due: Vec<DunningRecord> = inner
            .records
            .values()
            .filter(|r| r.is_active() && r.next_action_at.map_or(false, |at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_action_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn list(&self, filter: ListFilter, page: Page) -> Result<RecordPage, DomainError> {
        let inner = self.inner.read().await;
        let matching: Vec<&DunningRecord> = inner
            .newest_first()
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();
        Ok(RecordPage { records, total })
    }

    async fn stats(&self) -> Result<DunningStats, DomainError> {
        use crate::domain::dunning::Resolution;

        let inner = self.inner.read().await;
        let mut stats = DunningStats::default();
        for record in inner.records.values() {
            match &record.resolution {
                None => *stats.active_by_stage.entry(record.stage).or_insert(0) += 1,
                Some(Resolution::Recovered { .. }) => stats.recovered += 1,
                Some(Resolution::Canceled) => stats.canceled += 1,
            }
        }
        Ok(stats)
    }
}
