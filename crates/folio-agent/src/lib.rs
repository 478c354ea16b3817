//! Answer generation for Folio.
//!
//! Chat-model backends, conversation memory, the retrieval-generation
//! pipeline and the [`AskService`] that puts the cache in front of it.

/// Chat-model provider backends.
pub mod backends;
/// Model and provider settings.
pub mod config;
/// Per-session conversation summaries.
pub mod conversation;
/// Provider-agnostic chat client.
pub mod llm;
/// RETRIEVE then GENERATE.
pub mod pipeline;
/// Prompt templates.
pub mod prompt;
/// Request orchestration.
pub mod service;
/// Streaming events.
pub mod stream;
/// Topic extraction from summaries.
pub mod topics;

pub use backends::LlmBackend;
pub use config::{LlmProvider, ModelConfig};
pub use conversation::{ConversationMemory, MemoryConfig, MemoryEntry};
pub use llm::LlmClient;
pub use pipeline::{PipelineState, RagPipeline};
pub use service::{AnswerStream, AskRequest, AskResponse, AskService};
pub use stream::StreamEvent;
