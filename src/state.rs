use crate::service::chat_service::ChatService;
use crate::service::connection_manager::ConnectionManager;

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub chats: ChatService,
    pub connections: ConnectionManager,
    pub max_payload_bytes: usize,
}
