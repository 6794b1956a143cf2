use std::sync::Arc;

use crate::db::ChatStore;
use crate::errors::AppError;
use crate::models::{Conversation, ConversationPreview};
use crate::storage::ImageStore;

/// Read and upload operations behind the HTTP API.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    images: Arc<dyn ImageStore>,
    image_folder: String,
}

impl ChatService {
    pub fn new(store: Arc<dyn ChatStore>, images: Arc<dyn ImageStore>, image_folder: String) -> Self {
        Self { store, images, image_folder }
    }

    pub async fn get_conversations(&self) -> Result<Vec<ConversationPreview>, AppError> {
        self.store.list_previews().await
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, AppError> {
        self.store
            .get(conversation_id)
            .await?
            .ok_or_else(|| AppError::ConversationNotFound { id: conversation_id.to_string() })
    }

    pub async fn upload_image(&self, base64: Option<&str>) -> Result<String, AppError> {
        let payload = base64
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| AppError::malformed("Image required"))?;
        self.images.upload(payload, &self.image_folder).await
    }
}
