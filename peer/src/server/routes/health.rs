//! Unauthenticated liveness and discovery endpoints.

use axum::{extract::State, routing::get, Json, Router};

use crate::protocol::{PingResponse, ServerInfo};
use crate::server::AppState;
use crate::store::LocalStore;

/// Create health routes.
pub fn routes<S: LocalStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/server-info", get(server_info::<S>))
}

/// GET /api/ping - Liveness probe used by discovery and the monitor.
async fn ping() -> Json<PingResponse> {
    Json(PingResponse::ok())
}

/// GET /api/server-info - Pairing payload for first-time peers.
async fn server_info<S: LocalStore>(State(state): State<AppState<S>>) -> Json<ServerInfo> {
    Json(state.info.as_ref().clone())
}
