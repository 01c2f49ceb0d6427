//! HTTP surface: Prometheus metrics, readiness check and fault administration.
//!
//! The fault endpoint lets an operator inspect the current fault and raise or
//! clear one by hand. Overrides are written to the shared fault record and
//! announced to the reader loop, which republishes the fault channels.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::correlator::{FaultState, fault_text};
use crate::metrics::{ChannelGauges, format_prometheus_metrics};
use crate::monitor::ControlEvent;
use crate::state::SharedState;
use crate::stats::PipelineStats;

/// Shared handles of the HTTP handlers.
#[derive(Clone)]
pub struct ApiState {
    pub state: Arc<SharedState>,
    pub gauges: Arc<ChannelGauges>,
    pub stats: Arc<PipelineStats>,
    pub control: mpsc::UnboundedSender<ControlEvent>,
}

/// Body of a manual fault override.
#[derive(Debug, Deserialize)]
pub struct FaultRequest {
    #[serde(alias = "stoerNr")]
    pub number: i64,

    /// Defaults to the text of `number` from the fault table.
    #[serde(default, alias = "stoerMeldung")]
    pub text: Option<String>,
}

/// Body of an active fault.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaultResponse {
    pub number: i64,
    pub text: String,
    pub since: String,
}

/// Build the router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/readiness", get(readiness_handler))
        .route("/health", get(readiness_handler))
        .route(
            "/stoerung",
            get(get_fault_handler)
                .post(set_fault_handler)
                .delete(reset_fault_handler),
        )
        .with_state(state)
}

/// Start the HTTP server.
///
/// Runs until the listener fails. Returns an error if the server fails to
/// bind to the port.
pub async fn start_server(port: u16, state: ApiState) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP service is listening on http://{}", addr);
    info!("Readiness endpoint is /readiness");
    info!("Fault endpoint is /stoerung");
    info!("Metrics endpoint is /metrics");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))
}

fn now() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Liveness/readiness check.
async fn readiness_handler() -> impl IntoResponse {
    (StatusCode::OK, "Service is ready")
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(api): State<ApiState>) -> impl IntoResponse {
    let output = format_prometheus_metrics(&api.gauges, &api.stats);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

async fn get_fault_handler(State(api): State<ApiState>) -> Response {
    let fault = api.state.fault_snapshot();
    if !fault.active {
        return (StatusCode::NOT_FOUND, "No Stoerung").into_response();
    }
    Json(FaultResponse {
        number: fault.number,
        text: fault.text,
        since: fault.last_change,
    })
    .into_response()
}

async fn set_fault_handler(State(api): State<ApiState>, body: Bytes) -> Response {
    let request: FaultRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let text = request
        .text
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fault_text(request.number).to_string());
    info!("Fault {} set by operator: {}", request.number, text);

    api.state.set_fault(FaultState {
        number: request.number,
        text,
        active: true,
        last_change: now(),
    });
    notify(&api);

    (StatusCode::OK, "Störung updated successfully").into_response()
}

async fn reset_fault_handler(State(api): State<ApiState>) -> Response {
    info!("Fault reset by operator");
    api.state.set_fault(FaultState {
        number: 0,
        text: String::new(),
        active: false,
        last_change: now(),
    });
    notify(&api);

    (StatusCode::OK, "Störung reset successfully").into_response()
}

fn notify(api: &ApiState) {
    if api.control.send(ControlEvent::FaultChanged).is_err() {
        warn!("Reader loop is gone, fault override not published");
    }
}
