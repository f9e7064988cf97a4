//! NotificationGateway port - "send templated notification" capability.
//!
//! One call per stage transition. Delivery is best-effort from the
//! engine's point of view: failures are logged and never block a stage
//! write.

use async_trait::async_trait;

use crate::domain::dunning::DunningStage;
use crate::domain::foundation::{DomainError, DunningRecordId, Money, Timestamp, UserId};

/// Payload for one stage notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub record_id: DunningRecordId,
    pub user_id: UserId,
    pub stage: DunningStage,
    pub amount_due: Money,

    /// When the following stage kicks in; `None` for the cancellation notice.
    pub due_date_for_next_stage: Option<Timestamp>,
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), DomainError>;
}
