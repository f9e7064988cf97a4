//! PostgreSQL implementation of DunningRecordStore.
//!
//! The one-active-record rule is the partial unique index
//! `dunning_records_one_active_per_subscription`; updates are guarded by
//! `WHERE version = $n`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::dunning::{DunningMetadata, DunningRecord, DunningStage, Resolution};
use crate::domain::foundation::{
    DomainError, DunningRecordId, ErrorCode, EventId, Money, SubscriptionId, Timestamp, UserId,
};
use crate::ports::{
    DunningRecordStore, DunningStats, InsertResult, ListFilter, Page, RecordPage, UpdateResult,
};

const ONE_ACTIVE_INDEX: &str = "dunning_records_one_active_per_subscription";

const COLUMNS: &str = r#"
    id, subscription_id, user_id, stage, amount_cents, currency, gateway_invoice_ref,
    created_at, updated_at, reminder_count, metadata, source_event_id, next_action_at,
    archived_at, resolution, resolution_event_id, version
"#;

pub struct PostgresDunningRecordStore {
    pool: PgPool,
}

impl PostgresDunningRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a dunning record.
#[derive(Debug, sqlx::FromRow)]
struct DunningRecordRow {
    id: Uuid,
    subscription_id: String,
    user_id: String,
    stage: String,
    amount_cents: i64,
    currency: String,
    gateway_invoice_ref: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    reminder_count: i32,
    metadata: Json<DunningMetadata>,
    source_event_id: String,
    next_action_at: Option<DateTime<Utc>>,
    archived_at: Option<DateTime<Utc>>,
    resolution: Option<String>,
    resolution_event_id: Option<String>,
    version: i64,
}

impl TryFrom<DunningRecordRow> for DunningRecord {
    type Error = DomainError;

    fn try_from(row: DunningRecordRow) -> Result<Self, Self::Error> {
        let stage = DunningStage::from_str(&row.stage).map_err(corrupt)?;
        let resolution = parse_resolution(row.resolution.as_deref(), row.resolution_event_id)?;

        Ok(DunningRecord {
            id: DunningRecordId::from_uuid(row.id),
            subscription_id: SubscriptionId::new(row.subscription_id).map_err(corrupt)?,
            user_id: UserId::new(row.user_id).map_err(corrupt)?,
            stage,
            amount_due: Money::new(row.amount_cents, row.currency).map_err(corrupt)?,
            gateway_invoice_ref: row.gateway_invoice_ref,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            reminder_count: u32::try_from(row.reminder_count).map_err(corrupt)?,
            metadata: row.metadata.0,
            source_event_id: EventId::new(row.source_event_id).map_err(corrupt)?,
            next_action_at: row.next_action_at.map(Timestamp::from_datetime),
            archived_at: row.archived_at.map(Timestamp::from_datetime),
            resolution,
            version: u64::try_from(row.version).map_err(corrupt)?,
        })
    }
}

fn parse_resolution(
    kind: Option<&str>,
    event_id: Option<String>,
) -> Result<Option<Resolution>, DomainError> {
    match kind {
        None => Ok(None),
        Some("canceled") => Ok(Some(Resolution::Canceled)),
        Some("recovered") => {
            let event_id = event_id
                .ok_or_else(|| corrupt("recovered record without resolution_event_id"))
                .and_then(|e| EventId::new(e).map_err(corrupt))?;
            Ok(Some(Resolution::Recovered { event_id }))
        }
        Some(other) => Err(corrupt(format!("Invalid resolution value: {}", other))),
    }
}

fn resolution_event_id(resolution: &Option<Resolution>) -> Option<&str> {
    match resolution {
        Some(Resolution::Recovered { event_id }) => Some(event_id.as_str()),
        _ => None,
    }
}

fn corrupt(e: impl std::fmt::Display) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("Invalid stored record: {}", e))
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    DomainError::database(format!("{}: {}", context, e))
}

fn to_i64(v: u64, field: &str) -> Result<i64, DomainError> {
    i64::try_from(v).map_err(|_| DomainError::validation(field, "value too large"))
}

#[async_trait]
impl DunningRecordStore for PostgresDunningRecordStore {
    async fn insert(&self, record: &DunningRecord) -> Result<InsertResult, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO dunning_records (
                id, subscription_id, user_id, stage, amount_cents, currency, gateway_invoice_ref,
                created_at, updated_at, reminder_count, metadata, source_event_id, next_action_at,
                archived_at, resolution, resolution_event_id, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, 1)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.subscription_id.as_str())
        .bind(record.user_id.as_str())
        .bind(record.stage.as_str())
        .bind(record.amount_due.amount_cents())
        .bind(record.amount_due.currency())
        .bind(&record.gateway_invoice_ref)
        .bind(record.created_at.as_datetime())
        .bind(record.updated_at.as_datetime())
        .bind(record.reminder_count as i32)
        .bind(Json(&record.metadata))
        .bind(record.source_event_id.as_str())
        .bind(record.next_action_at.map(|t| *t.as_datetime()))
        .bind(record.archived_at.map(|t| *t.as_datetime()))
        .bind(record.resolution.as_ref().map(|r| r.as_str()))
        .bind(resolution_event_id(&record.resolution))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertResult::Inserted),
            Err(sqlx::Error::Database(db_err)) if db_err.constraint() == Some(ONE_ACTIVE_INDEX) => {
                let existing = self
                    .find_active_by_subscription(&record.subscription_id)
                    .await?
                    .ok_or_else(|| {
                        DomainError::database("Active record vanished after unique violation")
                    })?;
                Ok(InsertResult::ActiveExists(existing.id))
            }
            Err(e) => Err(db_error("Failed to insert dunning record", e)),
        }
    }

    async fn find_by_id(&self, id: &DunningRecordId) -> Result<Option<DunningRecord>, DomainError> {
        let row: Option<DunningRecordRow> =
            sqlx::query_as(&format!("SELECT {} FROM dunning_records WHERE id = $1", COLUMNS))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to find dunning record", e))?;

        row.map(DunningRecord::try_from).transpose()
    }

    async fn find_active_by_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<DunningRecord>, DomainError> {
        let row: Option<DunningRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM dunning_records WHERE subscription_id = $1 AND archived_at IS NULL",
            COLUMNS
        ))
        .bind(subscription_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find active dunning record", e))?;

        row.map(DunningRecord::try_from).transpose()
    }

    async fn find_latest_by_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<DunningRecord>, DomainError> {
        let row: Option<DunningRecordRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM dunning_records
            WHERE subscription_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
            COLUMNS
        ))
        .bind(subscription_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find latest dunning record", e))?;

        row.map(DunningRecord::try_from).transpose()
    }

    async fn update(&self, record: &DunningRecord) -> Result<UpdateResult, DomainError> {
        let new_version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE dunning_records SET
                stage = $3,
                updated_at = $4,
                reminder_count = $5,
                metadata = $6,
                next_action_at = $7,
                archived_at = $8,
                resolution = $9,
                resolution_event_id = $10,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(to_i64(record.version, "version")?)
        .bind(record.stage.as_str())
        .bind(record.updated_at.as_datetime())
        .bind(record.reminder_count as i32)
        .bind(Json(&record.metadata))
        .bind(record.next_action_at.map(|t| *t.as_datetime()))
        .bind(record.archived_at.map(|t| *t.as_datetime()))
        .bind(record.resolution.as_ref().map(|r| r.as_str()))
        .bind(resolution_event_id(&record.resolution))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update dunning record", e))?;

        match new_version {
            Some(v) => Ok(UpdateResult::Updated {
                version: u64::try_from(v).map_err(corrupt)?,
            }),
            None => Ok(UpdateResult::Conflict),
        }
    }

    async fn find_due(&self, now: Timestamp, limit: u32) -> Result<Vec<DunningRecord>, DomainError> {
        let rows: Vec<DunningRecordRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM dunning_records
            WHERE archived_at IS NULL AND next_action_at <= $1
            ORDER BY next_action_at ASC
            LIMIT $2
            "#,
            COLUMNS
        ))
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to query due dunning records", e))?;

        rows.into_iter().map(DunningRecord::try_from).collect()
    }

    async fn list(&self, filter: ListFilter, page: Page) -> Result<RecordPage, DomainError> {
        let stage = filter.stage.map(|s| s.as_str());
        let where_clause = r#"
            WHERE ($1::TEXT IS NULL AND archived_at IS NULL) OR stage = $1
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM dunning_records {}",
            where_clause
        ))
        .bind(stage)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to count dunning records", e))?;

        let rows: Vec<DunningRecordRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM dunning_records
            {}
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            COLUMNS, where_clause
        ))
        .bind(stage)
        .bind(to_i64(page.limit(), "per_page")?)
        .bind(to_i64(page.offset(), "page")?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list dunning records", e))?;

        Ok(RecordPage {
            records: rows
                .into_iter()
                .map(DunningRecord::try_from)
                .collect::<Result<_, _>>()?,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn stats(&self) -> Result<DunningStats, DomainError> {
        let active: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT stage, COUNT(*) FROM dunning_records
            WHERE archived_at IS NULL
            GROUP BY stage
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to count active records", e))?;

        let archived: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT resolution, COUNT(*) FROM dunning_records
            WHERE resolution IS NOT NULL
            GROUP BY resolution
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to count archived records", e))?;

        let mut stats = DunningStats::default();
        for (stage, count) in active {
            let stage = DunningStage::from_str(&stage).map_err(corrupt)?;
            stats
                .active_by_stage
                .insert(stage, u64::try_from(count).unwrap_or_default());
        }
        for (resolution, count) in archived {
            let count = u64::try_from(count).unwrap_or_default();
            match resolution.as_str() {
                "recovered" => stats.recovered = count,
                "canceled" => stats.canceled = count,
                other => return Err(corrupt(format!("Invalid resolution value: {}", other))),
            }
        }
        Ok(stats)
    }
}
