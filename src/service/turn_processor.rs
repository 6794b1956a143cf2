use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::agent::{build_messages, CompletionProvider, ProviderMessage};
use crate::db::{AppendOutcome, ChatStore};
use crate::errors::AppError;
use crate::models::{title_from_prompt, Frame, InboundTurn, Role, Turn};
use crate::storage::ImageStore;

const UNTITLED: &str = "Untitled chat";

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub image_folder: String,
    /// Longest wait for the stream to open or for its next chunk.
    pub stream_idle_timeout: Duration,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Validating,
    BuildingHistory,
    Streaming,
    Finalizing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Persisted; the caller owes the client a handshake carrying `chat_id`.
    Completed { chat_id: String },
    /// `[ERROR]` has been sent.
    Failed,
    /// Transport gone or turn cancelled; nothing more is sent.
    Aborted,
}

/// A turn that passed validation, with its image already resolved to a URL.
#[derive(Debug)]
struct ValidTurn {
    prompt: String,
    image_url: Option<String>,
    chat_id: Option<String>,
    history: Vec<Turn>,
}

/// Runs one chat turn: validate, replay history, stream the reply, persist.
pub struct TurnProcessor {
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn ChatStore>,
    images: Arc<dyn ImageStore>,
    settings: TurnSettings,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn send(outbound: &mpsc::Sender<Frame>, frame: Frame) -> Result<(), AppError> {
    outbound.send(frame).await.map_err(|_| AppError::TransportClosed)
}

impl TurnProcessor {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn ChatStore>,
        images: Arc<dyn ImageStore>,
        settings: TurnSettings,
    ) -> Self {
        Self { provider, store, images, settings }
    }

    /// Runs a turn to completion. Never fails: every error is turned into an outcome,
    /// and every failure the client can still hear about ends with `[ERROR]`.
    pub async fn run(
        &self,
        raw: &[u8],
        active_chat_id: Option<&str>,
        outbound: &mpsc::Sender<Frame>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut phase = TurnPhase::Validating;
        match self.execute(raw, active_chat_id, outbound, cancel, &mut phase).await {
            Ok(chat_id) => TurnOutcome::Completed { chat_id },
            Err(err) if err.is_silent_abort() => {
                debug!(?phase, "turn aborted: {err}");
                TurnOutcome::Aborted
            }
            Err(err) => {
                if err.is_validation() {
                    warn!(?phase, "rejected turn: {err}");
                } else if err.is_provider() {
                    error!(?phase, "completion provider failed: {err}");
                } else {
                    error!(?phase, "turn failed: {err}");
                }
                if send(outbound, Frame::Error).await.is_err() {
                    return TurnOutcome::Aborted;
                }
                TurnOutcome::Failed
            }
        }
    }

    async fn execute(
        &self,
        raw: &[u8],
        active_chat_id: Option<&str>,
        outbound: &mpsc::Sender<Frame>,
        cancel: &CancellationToken,
        phase: &mut TurnPhase,
    ) -> Result<String, AppError> {
        let (turn, reply) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::TurnCancelled),
            result = self.validate_and_stream(raw, outbound, phase) => result?,
        };

        *phase = TurnPhase::Finalizing;
        send(outbound, Frame::End).await?;
        if cancel.is_cancelled() {
            return Err(AppError::TurnCancelled);
        }

        let chat_id = turn.chat_id.as_deref().or(active_chat_id);
        self.persist(chat_id, turn.prompt, turn.image_url, reply).await
    }

    async fn validate_and_stream(
        &self,
        raw: &[u8],
        outbound: &mpsc::Sender<Frame>,
        phase: &mut TurnPhase,
    ) -> Result<(ValidTurn, String), AppError> {
        let turn = self.validate(raw).await?;

        *phase = TurnPhase::BuildingHistory;
        let messages = build_messages(&turn.history, &turn.prompt, turn.image_url.as_deref());

        *phase = TurnPhase::Streaming;
        let reply = self.stream_reply(messages, outbound).await?;
        Ok((turn, reply))
    }

    async fn validate(&self, raw: &[u8]) -> Result<ValidTurn, AppError> {
        if raw.len() > self.settings.max_payload_bytes {
            return Err(AppError::PayloadTooLarge {
                max_bytes: self.settings.max_payload_bytes,
                actual_bytes: raw.len(),
            });
        }

        // Rejects invalid UTF-8 as well as invalid JSON.
        let inbound: InboundTurn = serde_json::from_slice(raw)
            .map_err(|e| AppError::malformed(format!("invalid payload: {e}")))?;

        let prompt = inbound.prompt.unwrap_or_default();

        let image_url = non_blank(inbound.image_url);
        let image_base64 = non_blank(inbound.image_base64);
        if prompt.trim().is_empty() && image_url.is_none() && image_base64.is_none() {
            return Err(AppError::malformed("a prompt or an image is required"));
        }

        let history = inbound
            .history
            .into_iter()
            .map(|turn| Turn { image_url: non_blank(turn.image_url), ..turn })
            .collect::<Vec<_>>();
        if history
            .iter()
            .any(|turn| turn.role == Role::Assistant && turn.image_url.is_some())
        {
            return Err(AppError::malformed("assistant turns cannot carry images"));
        }

        let image_url = match (image_url, image_base64) {
            (Some(url), _) => Some(url),
            (None, Some(payload)) => {
                Some(self.images.upload(&payload, &self.settings.image_folder).await?)
            }
            (None, None) => None,
        };

        Ok(ValidTurn {
            prompt,
            image_url,
            chat_id: non_blank(inbound.chat_id),
            history,
        })
    }

    /// Forwards each fragment as soon as it arrives and returns the full reply.
    async fn stream_reply(
        &self,
        messages: Vec<ProviderMessage>,
        outbound: &mpsc::Sender<Frame>,
    ) -> Result<String, AppError> {
        let idle = self.settings.stream_idle_timeout;
        let timed_out = || AppError::StreamTimedOut { seconds: idle.as_secs() };

        let mut stream = tokio::time::timeout(idle, self.provider.stream(messages))
            .await
            .map_err(|_| timed_out())??;

        let mut reply = String::new();
        let mut fragments = 0usize;
        loop {
            let next = tokio::time::timeout(idle, stream.next())
                .await
                .map_err(|_| timed_out())?;
            match next {
                Some(Ok(fragment)) if fragment.is_empty() => continue,
                Some(Ok(fragment)) => {
                    reply.push_str(&fragment);
                    fragments += 1;
                    send(outbound, Frame::Fragment(fragment)).await?;
                }
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        debug!(fragments, reply_bytes = reply.len(), "completion stream finished");
        Ok(reply)
    }

    /// Appends the exchange to `chat_id`, or starts a new conversation when there is
    /// no id or it no longer resolves.
    async fn persist(
        &self,
        chat_id: Option<&str>,
        prompt: String,
        image_url: Option<String>,
        reply: String,
    ) -> Result<String, AppError> {
        let title = if prompt.trim().is_empty() {
            UNTITLED.to_string()
        } else {
            title_from_prompt(&prompt)
        };
        let turns = [Turn::user(prompt, image_url), Turn::assistant(reply)];

        if let Some(id) = chat_id {
            match self.store.append(id, &turns).await? {
                AppendOutcome::Appended => return Ok(id.to_string()),
                AppendOutcome::NotFound => {
                    warn!(conversation_id = %id, "conversation not found; starting a new one")
                }
            }
        }

        self.store.create(&title, &turns).await
    }
}
