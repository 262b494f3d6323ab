//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::connection::WorkerStatus;
use crate::correlator::BridgeError;
use crate::health::Health;
use crate::service::{HealthSnapshot, SimulatorService};
use crate::validation::{VALID_MESSAGE, validate_goose_config, validate_sv_configs};
use crate::version::VersionInfo;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: Health,
    pub worker: WorkerStatus,
    pub pending_requests: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending_ms: Option<u64>,
    pub version: VersionInfo,
}

impl From<HealthSnapshot> for HealthCheckResponse {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: snapshot.state,
            worker: snapshot.worker,
            pending_requests: snapshot.pending_requests,
            oldest_pending_ms: snapshot.oldest_pending.map(|d| d.as_millis() as u64),
            version: snapshot.version,
        }
    }
}

fn error_status(err: &BridgeError) -> StatusCode {
    match err {
        BridgeError::NoWorkerAttached => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::SendFailed(_) | BridgeError::WorkerDisconnected(_) => StatusCode::BAD_GATEWAY,
        BridgeError::RequestTimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
        BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turn an invoke outcome into the response the UI expects.
fn command_response(action: &str, result: Result<Value, BridgeError>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(reply) => (StatusCode::OK, Json(reply)),
        Err(e) => {
            tracing::error!(action, error = %e, "Command failed");
            (
                error_status(&e),
                Json(json!({ "error": format!("Failed to {}: {}", action, e) })),
            )
        }
    }
}

fn validation_response(result: Result<(), Vec<String>>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "message": VALID_MESSAGE }))),
        Err(errors) => {
            tracing::info!(?errors, "Configuration rejected");
            (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors })))
        }
    }
}

fn body_or_null(body: Option<Json<Value>>) -> Value {
    body.map(|Json(v)| v).unwrap_or(Value::Null)
}

async fn health_check(State(service): State<Arc<SimulatorService>>) -> Json<HealthCheckResponse> {
    Json(service.health().into())
}

async fn verify_config(body: Option<Json<Value>>) -> impl IntoResponse {
    validation_response(validate_sv_configs(&body_or_null(body)))
}

async fn verify_goose_config(body: Option<Json<Value>>) -> impl IntoResponse {
    validation_response(validate_goose_config(&body_or_null(body)))
}

async fn start_simulation(
    State(service): State<Arc<SimulatorService>>,
    body: Option<Json<Value>>,
) -> impl IntoResponse {
    command_response(
        "start simulation",
        service.start_simulation(body_or_null(body)).await,
    )
}

async fn stop_simulation(State(service): State<Arc<SimulatorService>>) -> impl IntoResponse {
    command_response("stop simulation", service.stop_simulation().await)
}

async fn pause_simulation(State(service): State<Arc<SimulatorService>>) -> impl IntoResponse {
    command_response("pause simulation", service.pause_simulation().await)
}

async fn send_goose_message(
    State(service): State<Arc<SimulatorService>>,
    body: Option<Json<Value>>,
) -> impl IntoResponse {
    command_response(
        "send goose",
        service.send_goose_message(body_or_null(body)).await,
    )
}

async fn shutdown(State(service): State<Arc<SimulatorService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(json!({})))
}

/// CORS for the simulator UI.
pub fn cors_layer(origin: &str) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ORIGIN,
            HeaderName::from_static("x-requested-with"),
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]);
    match origin.parse::<HeaderValue>() {
        Ok(value) => cors = cors.allow_origin(value),
        Err(e) => tracing::warn!(origin, error = %e, "Ignoring unparseable CORS origin"),
    }
    cors
}

pub fn routes(service: Arc<SimulatorService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/shutdown", post(shutdown))
        .route("/api/verify-config", post(verify_config))
        .route("/api/verify-goose-config", post(verify_goose_config))
        .route("/api/start-simulation", post(start_simulation))
        .route("/api/stop-simulation", post(stop_simulation))
        .route("/api/pause-simulation", post(pause_simulation))
        .route("/api/send-goose-message", post(send_goose_message))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
