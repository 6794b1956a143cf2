pub mod api_routes;
pub mod ws_routes;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use api_routes::{get_chat_handler, list_chats_handler, upload_image_handler};
use ws_routes::ws_chat_handler;

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_payload_bytes;
    Router::new()
        // WebSocket turn protocol
        .route("/", get(ws_chat_handler))
        .route("/ws", get(ws_chat_handler))
        // REST API
        .route("/api/upload-image", post(upload_image_handler))
        .route("/api/chats", get(list_chats_handler))
        .route("/api/chats/{id}", get(get_chat_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
