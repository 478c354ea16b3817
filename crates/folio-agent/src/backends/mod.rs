/// OpenAI-compatible chat completions.
pub mod openai;

use crate::stream::StreamEvent;
use async_trait::async_trait;
use folio_core::FolioResult;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Trait for chat-model provider backends.
///
/// A backend turns one rendered prompt into one completion. Implement it to
/// plug in a provider that does not speak the OpenAI API, or a test double.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Non-streaming completion.
    async fn complete(&self, prompt: &str) -> FolioResult<String>;

    /// Streaming completion.
    ///
    /// Returns a receiver for stream events and a join handle that resolves
    /// to the full completion text. The producer stops when the receiver is
    /// dropped.
    async fn complete_stream(
        &self,
        prompt: &str,
    ) -> FolioResult<(mpsc::Receiver<StreamEvent>, JoinHandle<FolioResult<String>>)>;
}
