//! API server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use cube_multicluster::{Aggregator, ClusterLifecycle};

use crate::auth::{IdentityProvider, TokenProvider};
use crate::error::ApiError;
use crate::routes::router;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Fleet queries
    pub aggregator: Aggregator,
    /// Join and registration
    pub lifecycle: Arc<ClusterLifecycle>,
    /// Login backend, if any
    pub identity: Option<Arc<IdentityProvider>>,
    /// Session token signer, if configured
    pub tokens: Option<Arc<TokenProvider>>,
}

/// Serve the API on `addr` until `shutdown` fires
pub async fn start_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ApiError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to bind {}: {}", addr, e)))?;

    info!(addr = %addr, "Starting kubecube API server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| ApiError::Internal(format!("server error: {}", e)))?;

    info!("kubecube API server stopped");
    Ok(())
}
