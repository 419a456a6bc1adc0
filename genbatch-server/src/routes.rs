use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use genbatch::rpc::{self, Envelope, Fault};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rpc", post(handle_rpc))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "version": VERSION}))
}

/// The single action dispatched endpoint.
///
/// Failed envelopes are answered with `400 Bad Request`, or `500 Internal Server Error` when the
/// store or the work item repository failed.
async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Envelope>) {
    let envelope = match body {
        Ok(Json(request)) => rpc::handle_json(state.orchestrator(), request).await,
        Err(rejection) => {
            Envelope::failure(Fault::Caller, format!("Malformed request: {rejection}"))
        }
    };
    let status = match envelope.fault {
        None => StatusCode::OK,
        Some(Fault::Caller) => StatusCode::BAD_REQUEST,
        Some(Fault::Server) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(envelope))
}
