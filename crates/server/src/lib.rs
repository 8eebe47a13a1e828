//! REST server for fleetindex
//!
//! Exposes job submission, job and index status, index statistics and text
//! queries over HTTP. Index and query routes require an `X-API-Key` from the
//! configured allow-list unless `server.require_auth` is off.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod api;
mod auth;
mod rest_server;

pub use auth::API_KEY_HEADER;
pub use rest_server::{build_router, ApiError, AppState};

// Re-export error types from core
pub use fleetindex_core::error::{Error, Result};

use fleetindex_core::Config;
use fleetindex_orchestrator::{Orchestrator, QueryOrchestrator};
use std::sync::Arc;
use tracing::info;

/// Run the REST server until Ctrl+C
///
/// Builds the orchestrator over the SSH executor, binds `server.host:server.port`
/// and serves until interrupted. Jobs still running at shutdown are abandoned;
/// only the merged index and the state file persist.
pub async fn run_server(config: Config) -> Result<()> {
    let executor = fleetindex_remote::create_executor(&config.remote);
    let query = Arc::new(QueryOrchestrator::from_config(Arc::clone(&executor), &config)?);
    let orchestrator = Orchestrator::new(config, executor)?;

    let server_config = orchestrator.config().server.clone();
    let state = AppState::new(orchestrator, query);
    let app = build_router(state, &server_config);

    let addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::config(format!("Failed to bind to {addr}: {e}")))?;

    info!("REST API listening on http://{addr}");
    if !server_config.require_auth {
        tracing::warn!("API key checks are disabled");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
                Err(e) => tracing::error!("Error setting up signal handler: {e}"),
            }
        })
        .await
        .map_err(|e| Error::config(format!("Server error: {e}")))?;

    info!("REST API shut down");
    Ok(())
}
