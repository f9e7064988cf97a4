//! PostgreSQL implementation of SubscriptionStore.
//!
//! `cancel_for_record` claims a row in `dunning_terminal_actions` in the
//! same transaction as the status write, so a replay for the same record
//! leaves the subscription alone.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, DunningRecordId, SubscriptionId};
use crate::ports::{SubscriptionStatus, SubscriptionStore};

use super::claim_terminal_action;

const CANCEL_ACTION: &str = "cancel_subscription";

pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn set_status(
        &self,
        subscription_id: &SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, status, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (id) DO UPDATE
                SET status = EXCLUDED.status, updated_at = now()
                WHERE subscriptions.status <> EXCLUDED.status
            "#,
        )
        .bind(subscription_id.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to set subscription status: {}", e)))?;

        Ok(())
    }

    async fn cancel_for_record(
        &self,
        subscription_id: &SubscriptionId,
        record_id: &DunningRecordId,
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::database(format!("Failed to begin transaction: {}", e)))?;

        if claim_terminal_action(&mut tx, record_id, CANCEL_ACTION).await? {
            sqlx::query(
                r#"
                INSERT INTO subscriptions (id, status, updated_at)
                VALUES ($1, $2, now())
                ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, updated_at = now()
                "#,
            )
            .bind(subscription_id.as_str())
            .bind(SubscriptionStatus::Canceled.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| DomainError::database(format!("Failed to cancel subscription: {}", e)))?;
        } else {
            tracing::debug!(%record_id, "Subscription already canceled for record");
        }

        tx.commit()
            .await
            .map_err(|e| DomainError::database(format!("Failed to commit transaction: {}", e)))
    }
}
