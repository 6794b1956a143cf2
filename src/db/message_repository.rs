use chrono::Utc;
use sqlx::{PgConnection, Row};
use tracing::error;

use crate::errors::AppError;
use crate::models::{Role, Turn};

/// Row-level access to the `messages` table.
/// Callers pass the connection of an open transaction so turns land together or not at all.
pub struct MessageRepository;

impl MessageRepository {
    pub async fn find_by_conversation_id(
        conn: &mut PgConnection,
        conversation_id: &str,
    ) -> Result<Vec<Turn>, AppError> {
        let rows = sqlx::query(
            "SELECT role, content, image_url
             FROM messages
             WHERE conversation_id = $1
             ORDER BY position ASC",
        )
        .bind(conversation_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to fetch messages for conversation {conversation_id}: {e}");
            AppError::db_query(
                format!("Failed to fetch messages for conversation {conversation_id}"),
                e,
            )
        })?;

        rows.into_iter()
            .map(|row: sqlx::postgres::PgRow| {
                let role_str: String = row
                    .try_get("role")
                    .map_err(|e| AppError::db_query("Failed to read role", e))?;
                let role = Role::try_from(role_str)
                    .map_err(|e| AppError::malformed(format!("Stored message has {e}")))?;
                Ok(Turn {
                    role,
                    content: row
                        .try_get("content")
                        .map_err(|e| AppError::db_query("Failed to read content", e))?,
                    image_url: row
                        .try_get("image_url")
                        .map_err(|e| AppError::db_query("Failed to read image_url", e))?,
                })
            })
            .collect()
    }

    /// Position the next appended turn should take.
    pub async fn next_position(
        conn: &mut PgConnection,
        conversation_id: &str,
    ) -> Result<i32, AppError> {
        sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM messages WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AppError::db_query("Failed to read message position", e))
    }

    pub async fn insert_all(
        conn: &mut PgConnection,
        conversation_id: &str,
        first_position: i32,
        turns: &[Turn],
    ) -> Result<(), AppError> {
        let now = Utc::now();
        for (position, turn) in (first_position..).zip(turns) {
            sqlx::query(
                "INSERT INTO messages (id, conversation_id, position, role, content, image_url, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(conversation_id)
            .bind(position)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .bind(turn.image_url.as_deref())
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                error!("Failed to save message for conversation {conversation_id}: {e}");
                AppError::db_query("Failed to save message", e)
            })?;
        }
        Ok(())
    }
}
