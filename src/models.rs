use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of prompt characters kept as the title of a new conversation.
pub const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Role {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// One role-tagged message of a conversation.
/// The same shape is used for client-supplied history and for stored turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>, image_url: Option<String>) -> Self {
        Self { role: Role::User, content: content.into(), image_url }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), image_url: None }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: String, title: String, messages: Vec<Turn>) -> Self {
        let now = Utc::now();
        Self { id, title, messages, created_at: now, updated_at: now }
    }

    pub fn preview(&self) -> ConversationPreview {
        ConversationPreview {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPreview {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Derives a conversation title from the first prompt of a new chat.
pub fn title_from_prompt(prompt: &str) -> String {
    prompt.chars().take(TITLE_MAX_CHARS).collect()
}

/// A chat turn as sent by the client over the WebSocket.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundTurn {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub history: Vec<Turn>,
}

pub const END_SENTINEL: &str = "[END]";
pub const ERROR_SENTINEL: &str = "[ERROR]";
pub const BUSY_SENTINEL: &str = "[BUSY]";

/// One outbound WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A raw token fragment, sent without an envelope.
    Fragment(String),
    End,
    Error,
    /// Reply to a message that arrived while a turn was still running.
    Busy,
    Handshake { chat_id: String },
}

impl Frame {
    pub fn into_text(self) -> String {
        match self {
            Frame::Fragment(text) => text,
            Frame::End => END_SENTINEL.to_string(),
            Frame::Error => ERROR_SENTINEL.to_string(),
            Frame::Busy => BUSY_SENTINEL.to_string(),
            Frame::Handshake { chat_id } => {
                serde_json::json!({ "chatId": chat_id, "done": true }).to_string()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadImageRequest {
    #[serde(default)]
    pub base64: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadImageResponse {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_keeps_first_thirty_chars() {
        let prompt = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFGHIJKLMN";
        assert_eq!(prompt.len(), 50);
        assert_eq!(title_from_prompt(prompt), "abcdefghijklmnopqrstuvwxyz0123");
        assert_eq!(title_from_prompt("hello"), "hello");
    }

    #[test]
    fn title_counts_characters_not_bytes() {
        let prompt = "é".repeat(40);
        assert_eq!(title_from_prompt(&prompt).chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn inbound_turn_defaults_missing_fields() {
        let turn: InboundTurn = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert_eq!(turn.prompt.as_deref(), Some("hi"));
        assert!(turn.history.is_empty());
        assert!(turn.chat_id.is_none());
        assert!(turn.image_url.is_none());
    }

    #[test]
    fn history_accepts_null_image_url() {
        let turn: InboundTurn = serde_json::from_str(
            r#"{"prompt":"next","chatId":"c1","history":[
                {"role":"user","content":"look","imageUrl":"https://img/1.jpg"},
                {"role":"assistant","content":"a cat","imageUrl":null}
            ]}"#,
        )
        .unwrap();
        assert_eq!(turn.chat_id.as_deref(), Some("c1"));
        assert_eq!(turn.history[0], Turn::user("look", Some("https://img/1.jpg".into())));
        assert_eq!(turn.history[1], Turn::assistant("a cat"));
    }

    #[test]
    fn unknown_history_role_is_rejected() {
        let parsed = serde_json::from_str::<InboundTurn>(
            r#"{"prompt":"x","history":[{"role":"system","content":"y"}]}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn frames_render_as_wire_text() {
        assert_eq!(Frame::Fragment("Hi".into()).into_text(), "Hi");
        assert_eq!(Frame::End.into_text(), "[END]");
        assert_eq!(Frame::Error.into_text(), "[ERROR]");
        assert_eq!(Frame::Busy.into_text(), "[BUSY]");

        let handshake = Frame::Handshake { chat_id: "abc".into() }.into_text();
        let value: serde_json::Value = serde_json::from_str(&handshake).unwrap();
        assert_eq!(value, serde_json::json!({ "chatId": "abc", "done": true }));
    }

    #[test]
    fn role_round_trips_through_storage_text() {
        assert_eq!(Role::try_from("ASSISTANT".to_string()), Ok(Role::Assistant));
        assert_eq!(Role::User.as_str(), "user");
        assert!(Role::try_from("tool".to_string()).is_err());
    }
}
