//! Long-running background task that mirrors new ledger entries to SQLite.
//!
//! The in-memory ledger is authoritative while the process runs; this task
//! makes it durable. It wakes when a command commits (via [`Notify`]) or on a
//! fixed interval, whichever comes first, and performs one final flush when
//! shutdown is requested.

use std::sync::Arc;
use std::time::Duration;

use aidtrail_protocol::AidLedger;
use sqlx::SqlitePool;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db;
use crate::errors::Result;

pub struct FlusherState {
    pub pool: SqlitePool,
    pub ledger: Arc<AidLedger>,
    pub notify: Arc<Notify>,
    pub interval: Duration,
}

/// Spawn the flusher loop as a background [`tokio`] task.
pub async fn run(state: Arc<FlusherState>, shutdown: CancellationToken) {
    let mut persisted = match db::max_persisted_sequence(&state.pool).await {
        Ok(seq) => seq,
        Err(e) => {
            error!("Flusher could not read the persisted head: {e}");
            None
        }
    };
    info!(persisted = ?persisted, "Ledger flusher starting");

    loop {
        let stopping = tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = state.notify.notified() => false,
            _ = tokio::time::sleep(state.interval) => false,
        };

        match flush_once(&state.pool, &state.ledger, persisted).await {
            Ok(next) => persisted = next,
            Err(e) => error!("Ledger flush error: {e}"),
        }

        if stopping {
            info!(persisted = ?persisted, "Ledger flusher stopped");
            break;
        }
    }
}

/// Persist every entry after `persisted`.
///
/// Returns the new persisted head.
pub async fn flush_once(
    pool: &SqlitePool,
    ledger: &AidLedger,
    persisted: Option<u64>,
) -> Result<Option<u64>> {
    let pending = ledger.ledger_since(persisted);
    let Some(last) = pending.last().map(|e| e.sequence) else {
        return Ok(persisted);
    };

    let inserted = db::insert_entries(pool, &pending).await?;
    info!(
        "Flushed {} ledger entries ({} new) up to sequence {last}",
        pending.len(),
        inserted
    );
    Ok(Some(last))
}
