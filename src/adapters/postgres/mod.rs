//! PostgreSQL adapters - Database implementations for the storage and
//! collaborator ports.
//!
//! - `PostgresDunningRecordStore` - records with version-checked updates
//! - `PostgresAuditLog` - audit trail and gateway event ledger
//! - `PostgresSubscriptionStore` - subscription status writes
//! - `PostgresUserDirectory` - profile reads and role downgrades

mod audit_log;
mod record_store;
mod subscription_store;
mod user_directory;

pub use audit_log::PostgresAuditLog;
pub use record_store::PostgresDunningRecordStore;
pub use subscription_store::PostgresSubscriptionStore;
pub use user_directory::PostgresUserDirectory;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

use crate::domain::foundation::{DomainError, DunningRecordId};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Opens a connection pool.
pub async fn connect(
    url: &str,
    max_connections: u32,
    min_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, DomainError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(acquire_timeout)
        .connect(url)
        .await
        .map_err(|e| DomainError::database(format!("Postgres connection failed: {}", e)))?;

    tracing::info!("Connected to database");
    Ok(pool)
}

/// Applies the embedded migrations under `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DomainError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| DomainError::database(format!("Migration failed: {}", e)))
}

/// Records that `action` ran for `record_id`. Returns false if it already had.
pub(crate) async fn claim_terminal_action(
    tx: &mut Transaction<'_, Postgres>,
    record_id: &DunningRecordId,
    action: &str,
) -> Result<bool, DomainError> {
    let result = sqlx::query(
        r#"
        INSERT INTO dunning_terminal_actions (record_id, action)
        VALUES ($1, $2)
        ON CONFLICT (record_id, action) DO NOTHING
        "#,
    )
    .bind(record_id.as_uuid())
    .bind(action)
    .execute(&mut **tx)
    .await
    .map_err(|e| DomainError::database(format!("Failed to record terminal action: {}", e)))?;

    Ok(result.rows_affected() == 1)
}
