use serde::Serialize;

use crate::models::{Role, Turn};

/// A message in the provider-neutral multimodal shape sent to the completion provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageRef },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRef {
    pub url: String,
}

impl ProviderMessage {
    fn from_parts(role: Role, text: &str, image_url: Option<&str>) -> Self {
        let content = match image_url {
            Some(url) => MessageContent::Parts(vec![
                ContentPart::Text { text: text.to_string() },
                ContentPart::ImageUrl { image_url: ImageRef { url: url.to_string() } },
            ]),
            None => MessageContent::Text(text.to_string()),
        };
        Self { role, content }
    }
}

impl From<&Turn> for ProviderMessage {
    fn from(turn: &Turn) -> Self {
        ProviderMessage::from_parts(turn.role, &turn.content, turn.image_url.as_deref())
    }
}

/// Replays `history` and appends the new user turn, in order.
pub fn build_messages(
    history: &[Turn],
    prompt: &str,
    image_url: Option<&str>,
) -> Vec<ProviderMessage> {
    history
        .iter()
        .map(ProviderMessage::from)
        .chain(std::iter::once(ProviderMessage::from_parts(Role::User, prompt, image_url)))
        .collect()
}
