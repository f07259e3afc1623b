//! AidTrail ledger service: entry point.
//!
//! Rebuilds the in-memory ledger from the SQLite mirror, starts the
//! background flusher that keeps the mirror current, and serves the Axum
//! REST API until ctrl-c.

mod api;
mod config;
mod db;
mod errors;
mod flusher;

use std::sync::Arc;

use aidtrail_protocol::{AidLedger, SystemClock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use flusher::FlusherState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url).await?;

    // ─── Ledger ───────────────────────────────────────────
    let entries = db::load_entries(&pool).await?;
    let restored = entries.len();
    let ledger = Arc::new(AidLedger::restore(
        entries,
        Arc::new(SystemClock),
        config.ledger_config(),
    )?);
    match ledger.integrity_fault() {
        Some(sequence) => warn!(
            sequence,
            "Persisted ledger failed verification; writes are blocked until an auditor clears the fault"
        ),
        None => info!(entries = restored, "Ledger restored"),
    }

    // ─── Background flusher ───────────────────────────────
    let notify = Arc::new(Notify::new());
    let shutdown = CancellationToken::new();
    let flusher_state = Arc::new(FlusherState {
        pool,
        ledger: ledger.clone(),
        notify: notify.clone(),
        interval: config.flush_interval(),
    });
    let flusher = tokio::spawn(flusher::run(flusher_state, shutdown.clone()));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(api::ApiState { ledger, notify }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    // The server may also stop on its own; the flusher must still drain.
    shutdown.cancel();
    flusher.await?;

    Ok(())
}
