//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, instrument};

use crate::controller::{metrics, AddressSet, SharedState};

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Liveness banner
pub async fn root() -> String {
    format!("Up and running. Version: {}", env!("CARGO_PKG_VERSION"))
}

/// Health check endpoint
pub async fn health() -> &'static str {
    "Health is OK"
}

/// Metrics endpoint handler
pub async fn metrics_handler() -> Response {
    match metrics::encode() {
        Ok(body) => ([(CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// This replica's local addresses
#[instrument(skip(state))]
pub async fn local_ips(State(state): State<Arc<SharedState>>) -> Json<AddressSet> {
    Json(state.local().as_ref().clone())
}

/// The last aggregate this replica computed
#[instrument(skip(state))]
pub async fn all_ips(State(state): State<Arc<SharedState>>) -> Json<AddressSet> {
    Json(state.aggregate().as_ref().clone())
}
