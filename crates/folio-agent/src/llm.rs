use crate::backends::openai::OpenAiBackend;
use crate::backends::LlmBackend;
use crate::config::ModelConfig;
use crate::stream::StreamEvent;
use folio_core::FolioResult;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Chat-model client that dispatches to a provider backend.
pub struct LlmClient {
    backend: Box<dyn LlmBackend>,
}

impl LlmClient {
    /// Client for an OpenAI-compatible provider sharing `http`.
    pub fn new(config: ModelConfig, http: reqwest::Client) -> Self {
        Self {
            backend: Box::new(OpenAiBackend::new(config, http)),
        }
    }

    /// Create from a pre-built backend (for custom providers and tests).
    pub fn from_backend(backend: Box<dyn LlmBackend>) -> Self {
        Self { backend }
    }

    /// Non-streaming completion.
    pub async fn complete(&self, prompt: &str) -> FolioResult<String> {
        self.backend.complete(prompt).await
    }

    /// Streaming completion: text deltas as they arrive, plus the full text.
    pub async fn complete_stream(
        &self,
        prompt: &str,
    ) -> FolioResult<(mpsc::Receiver<StreamEvent>, JoinHandle<FolioResult<String>>)> {
        self.backend.complete_stream(prompt).await
    }
}
