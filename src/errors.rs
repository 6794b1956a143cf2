use thiserror::Error;

/// Top-level application error.
/// Every turn failure is mapped onto one of these kinds before it reaches the socket.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Malformed turn: {message}")]
    MalformedInput { message: String },

    #[error("Payload exceeds max size of {max_bytes} bytes (actual: {actual_bytes})")]
    PayloadTooLarge { max_bytes: usize, actual_bytes: usize },

    // ── Completion provider errors ───────────────────────────────────────────
    #[error("Completion provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("Completion stream failed: {message}")]
    ProviderStream { message: String },

    #[error("Completion stream idle for more than {seconds}s")]
    StreamTimedOut { seconds: u64 },

    // ── Database errors ──────────────────────────────────────────────────────
    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Conversation '{id}' not found")]
    ConversationNotFound { id: String },

    // ── Image storage errors ─────────────────────────────────────────────────
    #[error("Image upload failed: {message}")]
    UploadFailed { message: String },

    // ── Connection errors ────────────────────────────────────────────────────
    #[error("Transport closed while sending")]
    TransportClosed,

    #[error("Turn cancelled by disconnect")]
    TurnCancelled,

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl AppError {
    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        AppError::MalformedInput { message: message.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::ConversationNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::MalformedInput { .. } | AppError::PayloadTooLarge { .. })
    }

    pub fn is_provider(&self) -> bool {
        matches!(
            self,
            AppError::ProviderUnavailable { .. }
                | AppError::ProviderStream { .. }
                | AppError::StreamTimedOut { .. }
        )
    }

    /// Errors that end a turn without anything left to tell the client.
    pub fn is_silent_abort(&self) -> bool {
        matches!(self, AppError::TransportClosed | AppError::TurnCancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(AppError::malformed("x").is_validation());
        assert!(AppError::PayloadTooLarge { max_bytes: 1, actual_bytes: 2 }.is_validation());
        assert!(AppError::StreamTimedOut { seconds: 5 }.is_provider());
        assert!(AppError::ConversationNotFound { id: "a".into() }.is_not_found());
        assert!(AppError::TransportClosed.is_silent_abort());
        assert!(AppError::TurnCancelled.is_silent_abort());
        assert!(!AppError::UploadFailed { message: "x".into() }.is_silent_abort());
    }

    #[test]
    fn messages_are_human_readable() {
        let err = AppError::PayloadTooLarge { max_bytes: 10, actual_bytes: 12 };
        assert_eq!(err.to_string(), "Payload exceeds max size of 10 bytes (actual: 12)");
    }
}
