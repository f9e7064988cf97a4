//! GetAccountHandler - Query handler for one record with its audit trail.

use std::sync::Arc;

use crate::domain::dunning::{AuditEntry, DunningError, DunningRecord};
use crate::domain::foundation::DunningRecordId;
use crate::ports::{AuditLog, DunningRecordStore, UserDirectory, UserProfile};

#[derive(Debug, Clone)]
pub struct GetAccountQuery {
    pub record_id: DunningRecordId,
}

#[derive(Debug, Clone)]
pub struct AccountDetail {
    pub record: DunningRecord,
    pub user: Option<UserProfile>,
    /// Oldest first, including suppressed duplicates and warnings.
    pub audit_trail: Vec<AuditEntry>,
}

pub type GetAccountResult = AccountDetail;

pub struct GetAccountHandler {
    records: Arc<dyn DunningRecordStore>,
    audit: Arc<dyn AuditLog>,
    users: Arc<dyn UserDirectory>,
}

impl GetAccountHandler {
    pub fn new(
        records: Arc<dyn DunningRecordStore>,
        audit: Arc<dyn AuditLog>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            records,
            audit,
            users,
        }
    }

    pub async fn handle(&self, query: GetAccountQuery) -> Result<GetAccountResult, DunningError> {
        let record = self
            .records
            .find_by_id(&query.record_id)
            .await?
            .ok_or_else(|| DunningError::not_found(query.record_id))?;

        let audit_trail = self.audit.list_for_record(&record.id).await?;

        let user = match self.users.find(&record.user_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(record_id = %record.id, error = %e, "User lookup failed");
                None
            }
        };

        Ok(AccountDetail {
            record,
            user,
            audit_trail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryAuditLog, InMemoryDunningRecordStore, InMemoryUserDirectory,
    };
    use crate::domain::dunning::{
        Actor, AuditAction, DunningMetadata, OpenDunningRecord, StagePolicy,
    };
    use crate::domain::foundation::{EventId, Money, SubscriptionId, Timestamp, UserId};
    use serde_json::json;

    fn t0() -> Timestamp {
        Timestamp::from_unix_secs(1_704_067_200).unwrap()
    }

    #[tokio::test]
    async fn returns_record_with_trail() {
        let store = Arc::new(InMemoryDunningRecordStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let users = Arc::new(InMemoryUserDirectory::new("free"));

        let record = DunningRecord::open(
            OpenDunningRecord {
                subscription_id: SubscriptionId::new("sub_1").unwrap(),
                user_id: UserId::new("user_1").unwrap(),
                amount_due: Money::new(100, "GBP").unwrap(),
                gateway_invoice_ref: "in_1".to_string(),
                source_event_id: EventId::new("evt_1").unwrap(),
                metadata: DunningMetadata::default(),
            },
            &StagePolicy::default(),
            t0(),
        );
        store.insert(&record).await.unwrap();
        for action in [AuditAction::PaymentFailure, AuditAction::ReminderSent] {
            audit
                .append(&AuditEntry::new(record.id, action, Actor::System, t0(), json!({})))
                .await
                .unwrap();
        }

        let handler = GetAccountHandler::new(store, audit, users);
        let detail = handler
            .handle(GetAccountQuery {
                record_id: record.id,
            })
            .await
            .unwrap();

        assert_eq!(detail.record.id, record.id);
        assert_eq!(detail.user, None);
        let actions: Vec<AuditAction> = detail.audit_trail.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::PaymentFailure, AuditAction::ReminderSent]);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let handler = GetAccountHandler::new(
            Arc::new(InMemoryDunningRecordStore::new()),
            Arc::new(InMemoryAuditLog::new()),
            Arc::new(InMemoryUserDirectory::new("free")),
        );
        let id = DunningRecordId::new();

        let err = handler.handle(GetAccountQuery { record_id: id }).await.unwrap_err();
        assert_eq!(err, DunningError::NotFound(id));
    }
}
