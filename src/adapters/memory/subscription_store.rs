//! In-memory SubscriptionStore with failure injection for tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, DunningRecordId, SubscriptionId};
use crate::ports::{SubscriptionStatus, SubscriptionStore};

#[derive(Default)]
struct Inner {
    statuses: HashMap<SubscriptionId, SubscriptionStatus>,
    canceled_by: HashSet<DunningRecordId>,
    cancel_calls: usize,
}

#[derive(Default)]
pub struct InMemorySubscriptionStore {
    inner: RwLock<Inner>,
    fail_writes: AtomicBool,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn status(&self, subscription_id: &SubscriptionId) -> Option<SubscriptionStatus> {
        self.inner.read().await.statuses.get(subscription_id).copied()
    }

    /// Cancellations that actually changed state.
    pub async fn cancellations(&self) -> usize {
        self.inner.read().await.cancel_calls
    }

    fn check_available(&self) -> Result<(), DomainError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DomainError::database("subscription store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn set_status(
        &self,
        subscription_id: &SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<(), DomainError> {
        self.check_available()?;
        self.inner
            .write()
            .await
            .statuses
            .insert(subscription_id.clone(), status);
        Ok(())
    }

    async fn cancel_for_record(
        &self,
        subscription_id: &SubscriptionId,
        record_id: &DunningRecordId,
    ) -> Result<(), DomainError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        if inner.canceled_by.insert(*record_id) {
            inner
                .statuses
                .insert(subscription_id.clone(), SubscriptionStatus::Canceled);
            inner.cancel_calls += 1;
        }
        Ok(())
    }
}
