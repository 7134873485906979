//! `POST /compute` route and relay-error mapping.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use contour_core::{ComputeRelay, RelayError};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<ComputeRelay>,
    pub max_body_bytes: usize,
}

/// Build the gateway router.
///
/// CORS is fully permissive so browser-based clients can call the service
/// directly; the layer also answers preflight requests.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/compute", post(compute))
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(cors)
        .with_state(state)
}

/// `POST /compute` — relay the JSON body through the compute executable.
async fn compute(State(state): State<AppState>, body: Bytes) -> Response {
    match state.relay.handle(&body).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => error_response(&err),
    }
}

/// Map a relay failure to an HTTP response. The match is exhaustive so a new
/// failure class cannot silently default to the wrong status.
fn error_response(err: &RelayError) -> Response {
    let status = match err {
        RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RelayError::SpawnFailed { .. }
        | RelayError::ComputationFailed { .. }
        | RelayError::InvalidOutput
        | RelayError::TimedOut(_)
        | RelayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}
