//! HTTP surface of the appliance.
//!
//! The control-plane core serves these routes; everything they know about
//! history comes through the datalog's public read path with a bounded lock
//! wait, so a stuck writer degrades requests into timeouts instead of
//! hanging them.

mod energy;

use crate::datalog::DataLog;
use crate::device::DeviceBank;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;

/// Shared state for the API handlers.
pub struct ApiState {
    /// The record log queried by the energy endpoint.
    pub datalog: Arc<DataLog>,
    /// Device bank providing the response columns.
    pub devices: Arc<DeviceBank>,
    /// Prometheus render handle; `None` disables `/metrics`.
    pub metrics: Option<PrometheusHandle>,
    /// Bound on the datalog lock wait per read.
    pub read_timeout: Duration,
}

/// Build the appliance router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/energy", get(energy::handle_energy))
        .route("/status", get(handle_status))
        .route("/metrics", get(handle_metrics))
        .route("/readyz", get(handle_readyz))
        .route("/livez", get(handle_livez))
        .with_state(state)
}

async fn handle_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let datalog = &state.datalog;
    Json(serde_json::json!({
        "entries": datalog.entries(),
        "interval": datalog.interval(),
        "first_ts": datalog.first_ts(),
        "last_ts": datalog.last_ts(),
    }))
}

async fn handle_metrics(State(state): State<Arc<ApiState>>) -> axum::response::Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_readyz(State(state): State<Arc<ApiState>>) -> StatusCode {
    if state.datalog.is_open() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn handle_livez() -> StatusCode {
    StatusCode::OK
}
