use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{AppendOutcome, ChatStore};
use crate::errors::AppError;
use crate::models::{Conversation, ConversationPreview, Turn};

/// Process-local [`ChatStore`], used when no database is configured.
/// Conversations are kept in creation order; nothing survives a restart.
#[derive(Default)]
pub struct InMemoryChatStore {
    conversations: RwLock<Vec<Conversation>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create(&self, title: &str, turns: &[Turn]) -> Result<String, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let conversation = Conversation::new(id.clone(), title.to_string(), turns.to_vec());
        self.conversations.write().await.push(conversation);
        Ok(id)
    }

    async fn append(&self, conversation_id: &str, turns: &[Turn]) -> Result<AppendOutcome, AppError> {
        let mut conversations = self.conversations.write().await;
        match conversations.iter_mut().find(|c| c.id == conversation_id) {
            Some(conversation) => {
                conversation.messages.extend_from_slice(turns);
                conversation.updated_at = Utc::now();
                Ok(AppendOutcome::Appended)
            }
            None => Ok(AppendOutcome::NotFound),
        }
    }

    async fn list_previews(&self) -> Result<Vec<ConversationPreview>, AppError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.iter().rev().map(Conversation::preview).collect())
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, AppError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.iter().find(|c| c.id == conversation_id).cloned())
    }
}
