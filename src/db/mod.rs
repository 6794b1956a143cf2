pub mod conversation_repository;
pub mod memory;
pub mod message_repository;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::{Conversation, ConversationPreview, Turn};

pub use conversation_repository::ConversationRepository;
pub use memory::InMemoryChatStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    NotFound,
}

/// Persistence for conversations. `create` and `append` are all-or-nothing.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Creates a conversation holding `turns` and returns its new id.
    async fn create(&self, title: &str, turns: &[Turn]) -> Result<String, AppError>;

    async fn append(&self, conversation_id: &str, turns: &[Turn]) -> Result<AppendOutcome, AppError>;

    /// Previews sorted newest first.
    async fn list_previews(&self) -> Result<Vec<ConversationPreview>, AppError>;

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, AppError>;
}
