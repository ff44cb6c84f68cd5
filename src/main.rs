// =============================================================================
// sage-core — Main Entry Point
// =============================================================================
//
// Boots the `Orchestrator`, serves the operator HTTP surface, and runs the
// periodic jobs described in §5 (fill-sync eviction, daily snapshot). The
// message-bus consumers (`a.candidates.v1`, `c.fills.v1`) are typed contracts
// only (§6) — no live NATS/JetStream client is wired in this core, so the
// periodic jobs here cover everything this process owns end-to-end.
// =============================================================================

mod api;
mod app_state;
mod bandit;
mod config;
mod consensus;
mod correlation;
mod decision_envelope;
mod episode;
mod error;
mod fill;
mod futures_intel;
mod hold_time;
mod indicators;
mod market_data;
mod regime;
mod risk;
mod snapshot;
mod state_store;
mod types;
mod venue;
mod walkforward;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::Orchestrator;
use crate::config::RuntimeConfig;

const RUNTIME_CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("sage-core — starting up");

    let config = RuntimeConfig::load(RUNTIME_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "no runtime config on disk, starting from defaults");
        RuntimeConfig::default()
    });

    let orchestrator = Arc::new(Orchestrator::new(config));

    let pg_pool = match std::env::var("DATABASE_URL") {
        Ok(url) => match sqlx::postgres::PgPoolOptions::new().max_connections(5).connect(&url).await {
            Ok(pool) => {
                info!("connected to Postgres");
                Some(pool)
            }
            Err(e) => {
                warn!(error = %e, "failed to connect to Postgres, running without persistence");
                None
            }
        },
        Err(_) => {
            warn!("DATABASE_URL not set, running without persistence");
            None
        }
    };

    spawn_fill_sync_job(orchestrator.clone(), pg_pool.clone());
    spawn_snapshot_job(orchestrator.clone());
    spawn_api_server(orchestrator.clone());

    info!("all subsystems running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    if let Err(e) = orchestrator.runtime_config.read().save(RUNTIME_CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("sage-core shut down complete");
    Ok(())
}

/// §5 fill-sync job: evicts stale tracked addresses and, if Postgres is
/// configured, writes through the live tracked-address table. Idempotent —
/// every run only touches current in-memory state, never replays fills.
fn spawn_fill_sync_job(orchestrator: Arc<Orchestrator>, pool: Option<sqlx::PgPool>) {
    tokio::spawn(async move {
        let interval_s = orchestrator.runtime_config.read().orchestrator.fill_sync_interval_s;
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_s));
        loop {
            interval.tick().await;
            let now = Utc::now();
            orchestrator.state_store.evict_stale(now);

            if let Some(pool) = &pool {
                for address in orchestrator.state_store.tracked_addresses() {
                    orchestrator.state_store.persist_tracked_address(pool, &address).await;
                }
            }

            info!(
                tracked_addresses = orchestrator.state_store.tracked_address_count(),
                scores = orchestrator.state_store.score_count(),
                "fill-sync tick complete"
            );
        }
    });
}

/// §5 snapshot job: runs once per UTC date, sleeping until the next UTC
/// midnight between runs.
fn spawn_snapshot_job(orchestrator: Arc<Orchestrator>) {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next_midnight = (now + ChronoDuration::days(1))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc();
            let sleep_s = (next_midnight - now).num_seconds().max(1) as u64;
            tokio::time::sleep(tokio::time::Duration::from_secs(sleep_s)).await;

            let snapshot_date = Utc::now();
            let selection_version = orchestrator.current_state_version();
            let rows = orchestrator.run_snapshot_job(snapshot_date, selection_version);

            info!(
                date = %snapshot_date.date_naive(),
                addresses = rows.len(),
                selected = rows.iter().filter(|r| r.is_pool_selected).count(),
                "daily snapshot job complete"
            );
        }
    });
}

/// §6 HTTP surface.
fn spawn_api_server(orchestrator: Arc<Orchestrator>) {
    tokio::spawn(async move {
        let bind_addr = std::env::var("SAGE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
        let app = api::rest::router(orchestrator);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });
}
