//! DunningRecordStore port - durable per-subscription recovery state.
//!
//! ## Concurrency contract
//!
//! `update` is a compare-and-swap on `version`: the write only lands if the
//! stored version still equals `record.version`, and the store increments
//! the version when it does. Callers that get `UpdateResult::Conflict`
//! reload and recompute instead of overwriting.
//!
//! `insert` refuses a second active record for the same subscription.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::domain::dunning::{DunningRecord, DunningStage};
use crate::domain::foundation::{DomainError, DunningRecordId, SubscriptionId, Timestamp};

/// Result of attempting to insert a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    /// Another active record already tracks this subscription.
    ActiveExists(DunningRecordId),
}

/// Result of a version-checked update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// Stored; `version` is the new stored version.
    Updated { version: u64 },
    /// The stored version moved on (or the record vanished).
    Conflict,
}

/// Filter for admin listings.
///
/// Without a stage only active records are listed. With a stage every
/// record at that stage is listed, archived ones included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub stage: Option<DunningStage>,
}

impl ListFilter {
    pub fn matches(&self, record: &DunningRecord) -> bool {
        match self.stage {
            Some(stage) => record.stage == stage,
            None => record.is_active(),
        }
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    pub const DEFAULT_PER_PAGE: u32 = 25;
    pub const MAX_PER_PAGE: u32 = 100;

    /// Clamps to page >= 1 and 1..=MAX_PER_PAGE items.
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(Self::DEFAULT_PER_PAGE)
                .clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of records plus the total number of matches.
#[derive(Debug, Clone)]
pub struct RecordPage {
    pub records: Vec<DunningRecord>,
    pub total: u64,
}

/// Aggregate counts for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DunningStats {
    /// Active records per stage.
    pub active_by_stage: BTreeMap<DunningStage, u64>,
    pub recovered: u64,
    pub canceled: u64,
}

impl DunningStats {
    pub fn total_active(&self) -> u64 {
        self.active_by_stage.values().sum()
    }
}

/// Port for dunning record persistence.
#[async_trait]
pub trait DunningRecordStore: Send + Sync {
    async fn insert(&self, record: &DunningRecord) -> Result<InsertResult, DomainError>;

    async fn find_by_id(&self, id: &DunningRecordId) -> Result<Option<DunningRecord>, DomainError>;

    /// The active record for a subscription, if any.
    async fn find_active_by_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<DunningRecord>, DomainError>;

    /// Most recently created record for a subscription, archived or not.
    async fn find_latest_by_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<DunningRecord>, DomainError>;

    /// Version-checked write of every mutable field.
    async fn update(&self, record: &DunningRecord) -> Result<UpdateResult, DomainError>;

    /// Active records whose next action is due at or before `now`, oldest
    /// due first.
    async fn find_due(&self, now: Timestamp, limit: u32) -> Result<Vec<DunningRecord>, DomainError>;

    /// Newest first.
    async fn list(&self, filter: ListFilter, page: Page) -> Result<RecordPage, DomainError>;

    async fn stats(&self) -> Result<DunningStats, DomainError>;
}
