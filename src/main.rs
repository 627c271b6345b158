//! LegisTrack API - Legislative Proposal Tracker
//!
//! Reconciles government-process records and parliamentary records into one
//! canonical timeline per bill.
//!
//! RECONCILIATION PIPELINE: every source batch runs through
//! - Linking: registry-number matching with a reviewed title fallback
//! - Reconciliation: loss-free stage merge, sub-records, voting
//! - Phase derivation: forward-only lifecycle with terminal short-circuits
//! - Development log: one classified event per phase transition

mod config;
mod db;
mod error;
mod models;
mod pipeline;
mod proposal;
mod routes;
mod state;

use crate::config::Settings;
use crate::db::ProposalRepository;
use crate::pipeline::SyncService;
use crate::proposal::ProposalStore;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting LegisTrack - Legislative Proposal Tracker...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let store = Arc::new(ProposalStore::new());
    let repository = match &settings.database {
        Some(database) => {
            let pool = db::create_pool(database).await.map_err(|e| {
                error!("❌ Failed to initialize database pool: {}", e);
                e
            })?;
            db::schema::ensure_schema(&pool).await?;

            let repository = ProposalRepository::new(pool);
            let loaded = repository.load_all().await?;
            info!("✅ Loaded {} proposals from the database", loaded.len());
            store.hydrate(loaded).await;
            store.hydrate_runs(repository.load_runs().await?).await;
            Some(repository)
        }
        None => {
            warn!("⚠️  DATABASE_URL not set, proposals are kept in memory only");
            None
        }
    };

    let shutdown = CancellationToken::new();
    let sync = SyncService::new(store, repository.clone(), &settings.sync, shutdown.clone())?;
    let state = Arc::new(AppState::new(sync, repository));

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Source Batches ───");
    info!("   POST /api/sync/government            - Reconcile a government batch");
    info!("   POST /api/sync/parliamentary         - Reconcile a parliamentary batch");
    info!("   GET  /api/sync/runs                  - Latest run per source");
    info!("");
    info!("   ─── Read Model ───");
    info!("   GET  /api/proposals                  - List proposals");
    info!("   GET  /api/proposals/{{id}}             - Proposal with stages and voting");
    info!("   GET  /api/developments               - Development log, newest first");
    info!("   GET  /api/stats                      - Proposal counts per phase");
    info!("");
    info!("   ─── Operations ───");
    info!("   GET  /api/review-queue               - Links awaiting confirmation");
    info!("   POST /api/review/{{id}}/confirm        - Confirm a parked link");
    info!("   POST /api/review/{{id}}/dismiss        - Dismiss a parked link");
    info!("   POST /api/proposals/{{id}}/resequence  - Renumber parliamentary stages");
    info!("   GET  /api/incidents                  - Collisions, outages, failed writes");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,legistrack_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler; running sync jobs stop between proposals
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
    shutdown.cancel();
}
