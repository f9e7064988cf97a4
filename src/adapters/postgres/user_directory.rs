//! PostgreSQL implementation of UserDirectory.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::domain::foundation::{DomainError, DunningRecordId, ErrorCode, UserId};
use crate::ports::{UserDirectory, UserProfile};

use super::claim_terminal_action;

const DOWNGRADE_ACTION: &str = "downgrade_user";

pub struct PostgresUserDirectory {
    pool: PgPool,
    lowest_role: String,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool, lowest_role: impl Into<String>) -> Self {
        Self {
            pool,
            lowest_role: lowest_role.into(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: Option<String>,
    display_name: Option<String>,
    role: String,
}

impl TryFrom<UserRow> for UserProfile {
    type Error = DomainError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserProfile {
            user_id: UserId::new(row.id).map_err(|e| {
                DomainError::new(ErrorCode::DatabaseError, format!("Invalid stored user: {}", e))
            })?,
            email: row.email,
            display_name: row.display_name,
            role: row.role,
        })
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    async fn find(&self, user_id: &UserId) -> Result<Option<UserProfile>, DomainError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, email, display_name, role FROM users WHERE id = $1")
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DomainError::database(format!("Failed to find user: {}", e)))?;

        row.map(UserProfile::try_from).transpose()
    }

    async fn find_many(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, UserProfile>, DomainError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<&str> = user_ids.iter().map(|id| id.as_str()).collect();

        let rows: Vec<UserRow> =
            sqlx::query_as("SELECT id, email, display_name, role FROM users WHERE id = ANY($1)")
                .bind(&ids)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DomainError::database(format!("Failed to find users: {}", e)))?;

        rows.into_iter()
            .map(|row| UserProfile::try_from(row).map(|p| (p.user_id.clone(), p)))
            .collect()
    }

    async fn downgrade_to_lowest(
        &self,
        user_id: &UserId,
        record_id: &DunningRecordId,
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::database(format!("Failed to begin transaction: {}", e)))?;

        if claim_terminal_action(&mut tx, record_id, DOWNGRADE_ACTION).await? {
            sqlx::query(
                r#"
                INSERT INTO users (id, role, updated_at)
                VALUES ($1, $2, now())
                ON CONFLICT (id) DO UPDATE SET role = EXCLUDED.role, updated_at = now()
                "#,
            )
            .bind(user_id.as_str())
            .bind(&self.lowest_role)
            .execute(&mut *tx)
            .await
            .map_err(|e| DomainError::database(format!("Failed to downgrade user: {}", e)))?;
        } else {
            tracing::debug!(%record_id, "User already downgraded for record");
        }

        tx.commit()
            .await
            .map_err(|e| DomainError::database(format!("Failed to commit transaction: {}", e)))
    }
}
