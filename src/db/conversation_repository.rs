use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error};

use super::message_repository::MessageRepository;
use super::{AppendOutcome, ChatStore};
use crate::errors::AppError;
use crate::models::{Conversation, ConversationPreview, Turn};

/// PostgreSQL-backed [`ChatStore`].
#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to open transaction: {e}");
            AppError::db_query("Failed to open transaction", e)
        })
    }
}

#[async_trait]
impl ChatStore for ConversationRepository {
    async fn create(&self, title: &str, turns: &[Turn]) -> Result<String, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tx = self.begin().await?;

        sqlx::query(
            "INSERT INTO conversations (id, title, created_at, updated_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&id)
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to save conversation {id}: {e}");
            AppError::db_query("Failed to save conversation", e)
        })?;

        MessageRepository::insert_all(&mut tx, &id, 0, turns).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::db_query("Failed to commit new conversation", e))?;
        debug!(conversation_id = %id, turns = turns.len(), "conversation created");
        Ok(id)
    }

    async fn append(&self, conversation_id: &str, turns: &[Turn]) -> Result<AppendOutcome, AppError> {
        let mut tx = self.begin().await?;

        // Row lock serializes concurrent appends to the same conversation.
        let exists = sqlx::query("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(conversation_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to find conversation {conversation_id}: {e}");
                AppError::db_query(format!("Failed to find conversation {conversation_id}"), e)
            })?
            .is_some();
        if !exists {
            return Ok(AppendOutcome::NotFound);
        }

        let position = MessageRepository::next_position(&mut tx, conversation_id).await?;
        MessageRepository::insert_all(&mut tx, conversation_id, position, turns).await?;

        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to update conversation timestamp {conversation_id}: {e}");
                AppError::db_query("Failed to update conversation", e)
            })?;

        tx.commit()
            .await
            .map_err(|e| AppError::db_query("Failed to commit appended turns", e))?;
        Ok(AppendOutcome::Appended)
    }

    async fn list_previews(&self) -> Result<Vec<ConversationPreview>, AppError> {
        sqlx::query_as::<_, ConversationPreview>(
            "SELECT id, title, created_at FROM conversations ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch all conversations: {e}");
            AppError::db_query("Failed to fetch conversations", e)
        })
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, AppError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::db_query("Failed to acquire connection", e))?;

        let Some(row) = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to find conversation {conversation_id}: {e}");
            AppError::db_query(format!("Failed to find conversation {conversation_id}"), e)
        })?
        else {
            return Ok(None);
        };

        let read = |column: &str, e: sqlx::Error| {
            AppError::db_query(format!("Failed to read {column}"), e)
        };
        let id: String = row.try_get("id").map_err(|e| read("id", e))?;
        let title: String = row.try_get("title").map_err(|e| read("title", e))?;
        let created_at: DateTime<Utc> =
            row.try_get("created_at").map_err(|e| read("created_at", e))?;
        let updated_at: DateTime<Utc> =
            row.try_get("updated_at").map_err(|e| read("updated_at", e))?;

        let messages = MessageRepository::find_by_conversation_id(&mut conn, &id).await?;

        Ok(Some(Conversation { id, title, messages, created_at, updated_at }))
    }
}
