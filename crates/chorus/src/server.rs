use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::build_info::Health;
use crate::rpc::{self, RpcHandler};
use crate::session::SessionRegistry;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub rpc: Arc<RpcHandler>,
}

impl AppState {
    pub fn new(registry: SessionRegistry) -> Self {
        let rpc = Arc::new(RpcHandler::new(registry.clone()));
        Self { registry, rpc }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health::ok(state.registry.len()))
}

async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| rpc::ws::serve_socket(socket, state.rpc))
}
