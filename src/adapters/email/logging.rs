//! NotificationGateway that only logs. Used when no email provider is configured.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::ports::{Notification, NotificationGateway};

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationGateway;

#[async_trait]
impl NotificationGateway for LoggingNotificationGateway {
    async fn send(&self, notification: &Notification) -> Result<(), DomainError> {
        tracing::info!(
            record_id = %notification.record_id,
            user_id = %notification.user_id,
            stage = %notification.stage,
            amount = %notification.amount_due,
            next_stage_due = ?notification.due_date_for_next_stage.map(|t| t.to_rfc3339()),
            "Dunning notification (email disabled)"
        );
        Ok(())
    }
}
