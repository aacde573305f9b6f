//! Axum HTTP server for the REST API

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::aggregator::{API_ALL_IPS_PATH, API_IPS_PATH};
use crate::controller::SharedState;
use crate::{Error, Result};

use super::auth::{require_bearer, BearerToken};
use super::handlers;

/// Routes served by every replica. Only the address endpoints need the token.
pub fn build_router(state: Arc<SharedState>, token: BearerToken) -> Router {
    let protected = Router::new()
        .route(API_IPS_PATH, get(handlers::local_ips))
        .route(API_ALL_IPS_PATH, get(handlers::all_ips))
        .route_layer(middleware::from_fn_with_state(token, require_bearer));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the REST API server until `shutdown` resolves
pub async fn run_server<F>(addr: SocketAddr, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("REST API server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    info!("REST API server stopped");
    Ok(())
}
