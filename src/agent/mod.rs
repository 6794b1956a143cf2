pub mod adapter;
pub mod openai;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::errors::AppError;

pub use adapter::{build_messages, ProviderMessage};
pub use openai::OpenAiCompletionClient;

/// Lazy, single-pass sequence of non-empty text increments.
/// Dropping it abandons the underlying provider request.
pub type FragmentStream = BoxStream<'static, Result<String, AppError>>;

/// Opens token streams against a completion provider.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn stream(&self, messages: Vec<ProviderMessage>) -> Result<FragmentStream, AppError>;
}
