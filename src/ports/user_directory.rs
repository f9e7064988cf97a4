//! UserDirectory port - read user display fields, downgrade roles.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::foundation::{DomainError, DunningRecordId, UserId};

/// User fields the dunning system reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find(&self, user_id: &UserId) -> Result<Option<UserProfile>, DomainError>;

    /// Batch lookup for admin listings. Unknown ids are simply absent.
    async fn find_many(&self, user_ids: &[UserId])
        -> Result<HashMap<UserId, UserProfile>, DomainError>;

    /// Downgrades the user's role to the lowest tier.
    ///
    /// Idempotent by `record_id`.
    async fn downgrade_to_lowest(
        &self,
        user_id: &UserId,
        record_id: &DunningRecordId,
    ) -> Result<(), DomainError>;
}
