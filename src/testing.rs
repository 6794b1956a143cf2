//! Test doubles for the injected collaborators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Notify};

use crate::agent::{CompletionProvider, FragmentStream, ProviderMessage};
use crate::db::{AppendOutcome, ChatStore, InMemoryChatStore};
use crate::errors::AppError;
use crate::models::{Conversation, ConversationPreview, Frame, Turn};
use crate::service::turn_processor::{TurnProcessor, TurnSettings};
use crate::storage::ImageStore;

#[derive(Clone, Debug)]
pub enum Step {
    Fragment(&'static str),
    Fail(&'static str),
}

/// Replays the same script for every turn and records what it was asked.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Vec<Step>,
    gate: Option<Arc<Notify>>,
    pub requests: Mutex<Vec<Vec<ProviderMessage>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Step>) -> Self {
        Self { script, ..Self::default() }
    }

    pub fn fragments(fragments: &[&'static str]) -> Self {
        Self::new(fragments.iter().copied().map(Step::Fragment).collect())
    }

    /// Holds every stream open until `gate` is notified once per turn.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn stream(&self, messages: Vec<ProviderMessage>) -> Result<FragmentStream, AppError> {
        self.requests.lock().unwrap().push(messages);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let items = self.script.clone().into_iter().map(|step| match step {
            Step::Fragment(text) => Ok(text.to_string()),
            Step::Fail(message) => Err(AppError::ProviderStream { message: message.to_string() }),
        });
        Ok(futures_util::stream::iter(items).boxed())
    }
}

/// Opens successfully and then never yields.
pub struct StalledProvider;

#[async_trait]
impl CompletionProvider for StalledProvider {
    async fn stream(&self, _messages: Vec<ProviderMessage>) -> Result<FragmentStream, AppError> {
        Ok(futures_util::stream::pending::<Result<String, AppError>>().boxed())
    }
}

/// Panics on its first request, then streams `fragments` for every later one.
pub struct PanickingProvider {
    panicked: AtomicBool,
    fragments: Vec<&'static str>,
}

impl PanickingProvider {
    pub fn new(fragments: &[&'static str]) -> Self {
        Self { panicked: AtomicBool::new(false), fragments: fragments.to_vec() }
    }
}

#[async_trait]
impl CompletionProvider for PanickingProvider {
    async fn stream(&self, _messages: Vec<ProviderMessage>) -> Result<FragmentStream, AppError> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("provider blew up");
        }
        let items: Vec<Result<String, AppError>> =
            self.fragments.iter().map(|text| Ok(text.to_string())).collect();
        Ok(futures_util::stream::iter(items).boxed())
    }
}

/// Store whose writes always fail; reads return nothing.
pub struct FailingStore;

#[async_trait]
impl ChatStore for FailingStore {
    async fn create(&self, _title: &str, _turns: &[Turn]) -> Result<String, AppError> {
        Err(AppError::db_query("Failed to save conversation", sqlx::Error::PoolTimedOut))
    }

    async fn append(&self, _id: &str, _turns: &[Turn]) -> Result<AppendOutcome, AppError> {
        Err(AppError::db_query("Failed to save message", sqlx::Error::PoolTimedOut))
    }

    async fn list_previews(&self) -> Result<Vec<ConversationPreview>, AppError> {
        Err(AppError::db_query("Failed to fetch conversations", sqlx::Error::PoolTimedOut))
    }

    async fn get(&self, _id: &str) -> Result<Option<Conversation>, AppError> {
        Ok(None)
    }
}

/// Returns a fixed URL, or fails when built with `failing()`.
pub struct StubImageStore {
    url: Option<&'static str>,
    pub uploads: Mutex<Vec<(String, String)>>,
}

impl StubImageStore {
    pub fn returning(url: &'static str) -> Self {
        Self { url: Some(url), uploads: Mutex::new(Vec::new()) }
    }

    pub fn failing() -> Self {
        Self { url: None, uploads: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ImageStore for StubImageStore {
    async fn upload(&self, base64_payload: &str, folder: &str) -> Result<String, AppError> {
        self.uploads
            .lock()
            .unwrap()
            .push((base64_payload.to_string(), folder.to_string()));
        self.url
            .map(str::to_string)
            .ok_or_else(|| AppError::UploadFailed { message: "stub failure".to_string() })
    }
}

pub fn settings() -> TurnSettings {
    TurnSettings {
        image_folder: "chat-images".to_string(),
        stream_idle_timeout: Duration::from_secs(5),
        max_payload_bytes: 64 * 1024,
    }
}

pub struct Harness {
    pub processor: Arc<TurnProcessor>,
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<InMemoryChatStore>,
    pub images: Arc<StubImageStore>,
}

pub fn harness(provider: ScriptedProvider) -> Harness {
    let provider = Arc::new(provider);
    let store = Arc::new(InMemoryChatStore::new());
    let images = Arc::new(StubImageStore::returning("https://cdn.test/chat-images/1.jpg"));
    let processor = Arc::new(TurnProcessor::new(
        provider.clone(),
        store.clone(),
        images.clone(),
        settings(),
    ));
    Harness { processor, provider, store, images }
}

/// Drains every frame currently buffered in `rx`.
pub fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}
