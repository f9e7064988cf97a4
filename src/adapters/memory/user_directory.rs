//! In-memory UserDirectory.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, DunningRecordId, UserId};
use crate::ports::{UserDirectory, UserProfile};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, UserProfile>,
    downgraded_by: HashSet<DunningRecordId>,
    downgrades: usize,
}

pub struct InMemoryUserDirectory {
    inner: RwLock<Inner>,
    lowest_role: String,
    fail_writes: AtomicBool,
}

impl InMemoryUserDirectory {
    pub fn new(lowest_role: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            lowest_role: lowest_role.into(),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub async fn insert(&self, profile: UserProfile) {
        self.inner
            .write()
            .await
            .users
            .insert(profile.user_id.clone(), profile);
    }

    pub async fn role_of(&self, user_id: &UserId) -> Option<String> {
        self.inner
            .read()
            .await
            .users
            .get(user_id)
            .map(|u| u.role.clone())
    }

    /// Downgrades that actually changed state.
    pub async fn downgrades(&self) -> usize {
        self.inner.read().await.downgrades
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find(&self, user_id: &UserId) -> Result<Option<UserProfile>, DomainError> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn find_many(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, UserProfile>, DomainError> {
        let inner = self.inner.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| inner.users.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    async fn downgrade_to_lowest(
        &self,
        user_id: &UserId,
        record_id: &DunningRecordId,
    ) -> Result<(), DomainError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DomainError::database("user directory unavailable"));
        }
        let mut inner = self.inner.write().await;
        if !inner.downgraded_by.insert(*record_id) {
            return Ok(());
        }
        let lowest = self.lowest_role.clone();
        let profile = inner
            .users
            .entry(user_id.clone())
            .or_insert_with(|| UserProfile {
                user_id: user_id.clone(),
                email: None,
                display_name: None,
                role: lowest.clone(),
            });
        profile.role = lowest;
        inner.downgrades += 1;
        Ok(())
    }
}
