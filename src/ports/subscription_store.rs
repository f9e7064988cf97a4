//! SubscriptionStore port - writes to the membership system's subscriptions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{DomainError, DunningRecordId, SubscriptionId};

/// Subscription status values the dunning engine writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Sets the status. Writing the current value again is a no-op.
    async fn set_status(
        &self,
        subscription_id: &SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<(), DomainError>;

    /// Cancels the subscription on behalf of a dunning record.
    ///
    /// Idempotent by `record_id`: a second call for the same record does
    /// nothing, even if the status was changed in between.
    async fn cancel_for_record(
        &self,
        subscription_id: &SubscriptionId,
        record_id: &DunningRecordId,
    ) -> Result<(), DomainError>;
}
