use async_trait::async_trait;
use futures_util::StreamExt;
use rig::completion::{CompletionError, CompletionModel};
use rig::message::{Message as RigMessage, UserContent};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use rig::OneOrMany;
use tracing::{debug, error};

use super::adapter::{ContentPart, MessageContent, ProviderMessage};
use super::{CompletionProvider, FragmentStream};
use crate::errors::AppError;
use crate::models::Role;

/// Streams chat completions from an OpenAI-compatible endpoint through rig.
#[derive(Clone)]
pub struct OpenAiCompletionClient {
    client: openai::Client,
    model: String,
}

impl OpenAiCompletionClient {
    pub fn new(api_key: &str, base_url: Option<&str>, model: &str) -> Result<Self, AppError> {
        let mut builder = openai::Client::builder().api_key(api_key);
        if let Some(base_url) = base_url {
            builder = builder.base_url(base_url);
        }
        let client = builder.build().map_err(|e| AppError::Configuration {
            message: format!("Failed to build OpenAI client: {e}"),
        })?;
        Ok(Self { client, model: model.to_string() })
    }
}

/// Converts a provider-neutral message into rig's message type.
/// Assistant content is text-only on the provider side, so any image parts are dropped.
fn to_rig_message(message: &ProviderMessage) -> Result<RigMessage, AppError> {
    match (&message.role, &message.content) {
        (Role::User, MessageContent::Text(text)) => Ok(RigMessage::user(text.clone())),
        (Role::Assistant, MessageContent::Text(text)) => Ok(RigMessage::assistant(text.clone())),
        (Role::Assistant, MessageContent::Parts(parts)) => {
            let text: String = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect();
            Ok(RigMessage::assistant(text))
        }
        (Role::User, MessageContent::Parts(parts)) => {
            let content: Vec<UserContent> = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } if text.is_empty() => None,
                    ContentPart::Text { text } => Some(UserContent::text(text.clone())),
                    ContentPart::ImageUrl { image_url } => {
                        Some(UserContent::image_url(image_url.url.clone(), None, None))
                    }
                })
                .collect();
            let content = OneOrMany::many(content)
                .map_err(|_| AppError::malformed("user message has no content"))?;
            Ok(RigMessage::User { content })
        }
    }
}

/// True when any error in the chain says the endpoint could not be reached.
fn is_unreachable(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(e) = err.downcast_ref::<reqwest::Error>() {
            if e.is_connect() {
                return true;
            }
        }
        if let Some(e) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotConnected
            ) {
                return true;
            }
        }
        current = err.source();
    }
    false
}

fn classify(error: CompletionError) -> AppError {
    let unreachable = is_unreachable(&error);
    let message = error.to_string();
    if unreachable {
        AppError::ProviderUnavailable { message }
    } else {
        AppError::ProviderStream { message }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletionClient {
    async fn stream(&self, messages: Vec<ProviderMessage>) -> Result<FragmentStream, AppError> {
        let mut history = messages
            .iter()
            .map(to_rig_message)
            .collect::<Result<Vec<_>, _>>()?;
        let Some(prompt) = history.pop() else {
            return Err(AppError::malformed("no messages to send"));
        };

        debug!(model = %self.model, history_len = history.len(), "opening completion stream");

        let model = self.client.completion_model(self.model.clone());
        let response = model
            .completion_request(prompt)
            .messages(history)
            .stream()
            .await
            .map_err(|e| {
                error!(model = %self.model, error = %e, "failed to open completion stream");
                classify(e)
            })?;

        let fragments = response.filter_map(|item| async move {
            match item {
                Ok(StreamedAssistantContent::Text(text)) if !text.text.is_empty() => {
                    Some(Ok(text.text))
                }
                Ok(_) => None,
                Err(e) => Some(Err(classify(e))),
            }
        });

        Ok(fragments.boxed())
    }
}
