//! Axum `/ws` route.
//!
//! Upgrades the HTTP request and hands both halves of the socket to the hub.

use axum::{
    extract::ws::{WebSocket, WebSocketUpgrade},
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::SubscriberHub;

/// Frames above this multiple of the soft limit fail the socket outright.
const HARD_LIMIT_FACTOR: usize = 4;

/// Router serving the `/ws` endpoint for `hub`.
pub fn router(hub: Arc<SubscriberHub>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(hub)
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<SubscriberHub>>) -> Response {
    if hub.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let hard_limit = hub
        .config()
        .max_frame_bytes
        .saturating_mul(HARD_LIMIT_FACTOR);
    ws.max_message_size(hard_limit)
        .max_frame_size(hard_limit)
        .on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<SubscriberHub>) {
    let (sink, stream) = socket.split();
    match hub.accept(sink, stream) {
        Ok(id) => debug!(conn = id, "client connected"),
        Err(e) => warn!(error = %e, "client refused"),
    }
}
