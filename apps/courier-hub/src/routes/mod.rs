pub mod health;

use axum::Router;

use crate::AppState;

/// All HTTP routes: the health probe and the WebSocket endpoint at the
/// configured path.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router(&state.config.web_socket_path))
}
