//! Recording NotificationGateway for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::domain::dunning::DunningStage;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{Notification, NotificationGateway};

/// Captures every notification; can be told to fail.
#[derive(Default)]
pub struct RecordingNotificationGateway {
    sent: RwLock<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub async fn sent_stages(&self) -> Vec<DunningStage> {
        self.sent.read().await.iter().map(|n| n.stage).collect()
    }
}

#[async_trait]
impl NotificationGateway for RecordingNotificationGateway {
    async fn send(&self, notification: &Notification) -> Result<(), DomainError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DomainError::new(
                ErrorCode::NotificationFailed,
                "notification channel unavailable",
            ));
        }
        self.sent.write().await.push(notification.clone());
        Ok(())
    }
}
