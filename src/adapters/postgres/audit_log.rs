//! PostgreSQL implementation of AuditLog.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::dunning::{Actor, AuditAction, AuditEntry};
use crate::domain::foundation::{
    AuditEntryId, DomainError, DunningRecordId, ErrorCode, EventId, Timestamp,
};
use crate::ports::{AppendResult, AuditLog};

pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditEntryRow {
    id: Uuid,
    dunning_record_id: Uuid,
    action: String,
    actor: String,
    occurred_at: DateTime<Utc>,
    details: Json<serde_json::Value>,
    event_id: Option<String>,
}

impl TryFrom<AuditEntryRow> for AuditEntry {
    type Error = DomainError;

    fn try_from(row: AuditEntryRow) -> Result<Self, Self::Error> {
        let action = AuditAction::from_str(&row.action).map_err(corrupt)?;
        let actor = Actor::from_storage(&row.actor).map_err(corrupt)?;
        let event_id = row
            .event_id
            .map(EventId::new)
            .transpose()
            .map_err(corrupt)?;

        Ok(AuditEntry {
            id: AuditEntryId::from_uuid(row.id),
            dunning_record_id: DunningRecordId::from_uuid(row.dunning_record_id),
            action,
            actor,
            timestamp: Timestamp::from_datetime(row.occurred_at),
            details: row.details.0,
            event_id,
        })
    }
}

fn corrupt(e: impl std::fmt::Display) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("Invalid stored audit entry: {}", e))
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<AppendResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO dunning_audit_entries (
                id, dunning_record_id, action, actor, occurred_at, details, event_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id) WHERE event_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.dunning_record_id.as_uuid())
        .bind(entry.action.as_str())
        .bind(entry.actor.to_storage())
        .bind(entry.timestamp.as_datetime())
        .bind(Json(&entry.details))
        .bind(entry.event_id.as_ref().map(|e| e.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to append audit entry: {}", e)))?;

        if result.rows_affected() == 0 {
            Ok(AppendResult::DuplicateEvent)
        } else {
            Ok(AppendResult::Appended)
        }
    }

    async fn exists_for_event(&self, event_id: &EventId) -> Result<bool, DomainError> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM dunning_audit_entries WHERE event_id = $1)",
        )
        .bind(event_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to check event ledger: {}", e)))
    }

    async fn list_for_record(
        &self,
        record_id: &DunningRecordId,
    ) -> Result<Vec<AuditEntry>, DomainError> {
        let rows: Vec<AuditEntryRow> = sqlx::query_as(
            r#"
            SELECT id, dunning_record_id, action, actor, occurred_at, details, event_id
            FROM dunning_audit_entries
            WHERE dunning_record_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(record_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to list audit entries: {}", e)))?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}
