//! Database layer: migrations and the durable ledger mirror.

use std::str::FromStr;

use aidtrail_protocol::ledger::{canonical_json, format_timestamp};
use aidtrail_protocol::{LedgerAction, LedgerEntry, Role};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::info;

use crate::errors::{ApiError, Result};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// A private in-memory database. One connection, so every query sees the
/// same database.
#[cfg(test)]
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct LedgerRow {
    sequence: i64,
    reference_id: String,
    action: String,
    entity_name: String,
    role: String,
    timestamp: String,
    payload: String,
    prev_hash: String,
    hash: String,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = ApiError;

    fn try_from(row: LedgerRow) -> Result<Self> {
        let corrupt = |reason: String| ApiError::CorruptRow {
            sequence: row.sequence,
            reason,
        };
        let sequence = u64::try_from(row.sequence)
            .map_err(|_| corrupt("negative sequence".to_string()))?;
        let action = LedgerAction::from_str(&row.action).map_err(|e| corrupt(e.to_string()))?;
        let role = Role::parse(&row.role)
            .ok_or_else(|| corrupt(format!("unknown role {}", row.role)))?;
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| corrupt(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        let payload =
            serde_json::from_str(&row.payload).map_err(|e| corrupt(format!("bad payload: {e}")))?;

        Ok(LedgerEntry {
            sequence,
            reference_id: row.reference_id,
            action,
            entity_name: row.entity_name,
            role,
            timestamp,
            payload,
            prev_hash: row.prev_hash,
            hash: row.hash,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Ledger writes
// ─────────────────────────────────────────────────────────

/// Highest persisted sequence, or `None` for an empty table.
pub async fn max_persisted_sequence(pool: &SqlitePool) -> Result<Option<u64>> {
    let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(sequence) FROM ledger_entries")
        .fetch_one(pool)
        .await?;
    Ok(row.0.and_then(|s| u64::try_from(s).ok()))
}

/// Persist a batch of entries in one transaction. Sequences already present
/// are silently ignored so a repeated flush is harmless.
pub async fn insert_entries(pool: &SqlitePool, entries: &[LedgerEntry]) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let mut count = 0usize;
    for entry in entries {
        let payload = canonical_json(&entry.payload)?;
        let rows_affected = sqlx::query(
            r#"
            INSERT OR IGNORE INTO ledger_entries
                (sequence, reference_id, action, entity_name, role, timestamp,
                 payload, prev_hash, hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(entry.sequence as i64)
        .bind(&entry.reference_id)
        .bind(entry.action.as_str())
        .bind(&entry.entity_name)
        .bind(entry.role.as_str())
        .bind(format_timestamp(&entry.timestamp))
        .bind(payload)
        .bind(&entry.prev_hash)
        .bind(&entry.hash)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        count += rows_affected as usize;
    }
    tx.commit().await?;
    Ok(count)
}

// ─────────────────────────────────────────────────────────
// Ledger reads
// ─────────────────────────────────────────────────────────

/// Every persisted entry, sequence ascending.
pub async fn load_entries(pool: &SqlitePool) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query_as::<_, LedgerRow>(
        r#"
        SELECT sequence, reference_id, action, entity_name, role, timestamp,
               payload, prev_hash, hash
        FROM   ledger_entries
        ORDER  BY sequence ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(LedgerEntry::try_from).collect()
}
