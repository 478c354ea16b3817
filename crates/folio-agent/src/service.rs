//! Request orchestration: cache, memory, pipeline, write-back.

use crate::conversation::ConversationMemory;
use crate::pipeline::{PipelineState, RagPipeline};
use crate::prompt::PROFILE_SUMMARY_QUESTION;
use crate::stream::StreamEvent;
use folio_core::ChatMessage;
use folio_memory::SemanticCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Answer shown when the pipeline fails.
pub const ERROR_ANSWER: &str = "Error: unable to generate an answer right now.";
/// Profile summary shown when generation fails.
pub const SUMMARY_FALLBACK: &str = "Welcome to my portfolio! Ask me anything about my experience.";
/// Profile summary shown when no document index is configured.
pub const NO_PROFILE_DATA: &str = "No profile data available. Please ingest your resume.";
/// Longest session id accepted from callers, in bytes.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// A question from a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AskRequest {
    /// The question.
    pub message: String,
    /// Session to continue; a new one is assigned when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Latest turns of the conversation, oldest first.
    #[serde(default)]
    pub recent_messages: Vec<ChatMessage>,
}

impl AskRequest {
    /// Request for `message` with no session or history.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Continue `session_id`.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach recent turns.
    pub fn with_recent_messages(mut self, recent_messages: Vec<ChatMessage>) -> Self {
        self.recent_messages = recent_messages;
        self
    }
}

/// A complete answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskResponse {
    /// Answer text, or [`ERROR_ANSWER`] on failure.
    pub answer: String,
    /// Session the answer belongs to.
    pub session_id: String,
    /// Whether the answer came from the cache.
    pub cached: bool,
}

/// An answer being streamed.
pub struct AnswerStream {
    /// Session the answer belongs to, assigned when the caller sent none.
    pub session_id: String,
    /// Whether the answer came from the cache.
    pub cached: bool,
    /// Text deltas, then `Done` or `Error`.
    pub events: mpsc::Receiver<StreamEvent>,
    /// Resolves once write-back has finished or been skipped.
    pub completion: JoinHandle<()>,
}

/// Answers questions about the profile.
#[derive(Clone)]
pub struct AskService {
    cache: Arc<SemanticCache>,
    memory: Arc<ConversationMemory>,
    pipeline: Arc<RagPipeline>,
}

impl AskService {
    /// Service over the given components.
    pub fn new(
        cache: Arc<SemanticCache>,
        memory: Arc<ConversationMemory>,
        pipeline: Arc<RagPipeline>,
    ) -> Self {
        Self {
            cache,
            memory,
            pipeline,
        }
    }

    /// The semantic cache.
    pub fn cache(&self) -> &SemanticCache {
        &self.cache
    }

    /// The conversation memory.
    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// The retrieval-generation pipeline.
    pub fn pipeline(&self) -> &RagPipeline {
        &self.pipeline
    }

    /// Eagerly create the cache and memory collections. Failures are logged
    /// and retried on first use.
    pub async fn initialize(&self) {
        let (cache, memory) = tokio::join!(self.cache.initialize(), self.memory.initialize());
        info!(
            cache_ready = cache.is_ready(),
            memory_ready = memory.is_ready(),
            "Ask service initialized"
        );
    }

    /// Answer `request`, streaming the text as it is generated.
    ///
    /// A cache hit is delivered as a single delta. On a miss the pipeline
    /// runs with the session's relevant summaries; once the whole answer has
    /// been delivered it is cached and, for long enough exchanges, the
    /// exchange is summarised into memory. A failed or abandoned stream
    /// writes nothing.
    pub async fn ask_stream(&self, request: AskRequest) -> AnswerStream {
        let session_id = match request.session_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() && id.len() <= MAX_SESSION_ID_LEN => id.to_string(),
            Some(id) if !id.is_empty() => {
                warn!(len = id.len(), "Session id too long; starting a new session");
                uuid::Uuid::new_v4().to_string()
            }
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let (tx, rx) = mpsc::channel::<StreamEvent>(64);

        if let Some(answer) = self.cache.search(&request.message).await {
            info!(session_id = %session_id, "Serving cached answer");
            let completion = tokio::spawn(async move {
                if tx.send(StreamEvent::TextDelta { text: answer }).await.is_ok() {
                    let _ = tx.send(StreamEvent::Done).await;
                }
            });
            return AnswerStream {
                session_id,
                cached: true,
                events: rx,
                completion,
            };
        }

        let service = self.clone();
        let task_session = session_id.clone();
        let completion = tokio::spawn(async move {
            service.answer_miss(request, task_session, tx).await;
        });
        AnswerStream {
            session_id,
            cached: false,
            events: rx,
            completion,
        }
    }

    async fn answer_miss(&self, request: AskRequest, session_id: String, tx: mpsc::Sender<StreamEvent>) {
        let k = self.memory.config().k;
        let conversation_context = self
            .memory
            .retrieve_relevant_context(&request.message, &session_id, k)
            .await;

        let state = PipelineState::new(request.message.clone())
            .with_session(session_id.clone())
            .with_conversation(conversation_context, request.recent_messages.clone());

        let (mut events, handle) = match self.pipeline.run_streaming(state).await {
            Ok(started) => started,
            Err(e) => {
                warn!(error = %e, session_id = %session_id, "Pipeline failed before streaming");
                send_error(&tx).await;
                return;
            }
        };

        let mut delivered = true;
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    if tx.send(StreamEvent::TextDelta { text }).await.is_err() {
                        delivered = false;
                        break;
                    }
                }
                // Completion and errors are reported from the pipeline result.
                StreamEvent::Done | StreamEvent::Error { .. } => {}
            }
        }
        drop(events);

        let state = match handle.await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                warn!(error = %e, session_id = %session_id, "Pipeline failed; nothing cached");
                send_error(&tx).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, session_id = %session_id, "Pipeline task panicked; nothing cached");
                send_error(&tx).await;
                return;
            }
        };

        // Buffered deltas count as delivered only while the receiver lives.
        if !delivered || tx.is_closed() {
            info!(session_id = %session_id, "Client went away; skipping cache and memory writes");
            return;
        }

        let summarize = self.memory.should_summarize(request.recent_messages.len());
        tokio::join!(self.cache.add(&request.message, &state.answer), async {
            if summarize {
                self.memory
                    .store_summary(&session_id, &request.recent_messages)
                    .await;
            }
        });

        let _ = tx.send(StreamEvent::Done).await;
    }

    /// Answer `request` in full.
    pub async fn ask(&self, request: AskRequest) -> AskResponse {
        let AnswerStream {
            session_id,
            cached,
            mut events,
            completion,
        } = self.ask_stream(request).await;

        let mut answer = String::new();
        let mut failed = false;
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::TextDelta { text } => answer.push_str(&text),
                StreamEvent::Error { message } => {
                    failed = true;
                    answer = message;
                }
                StreamEvent::Done => {}
            }
        }
        if let Err(e) = completion.await {
            warn!(error = %e, "Answer task failed");
            failed = true;
        }
        if failed {
            answer = ERROR_ANSWER.to_string();
        }

        AskResponse {
            answer,
            session_id,
            cached,
        }
    }

    /// A short first-person summary of the profile. Never fails.
    pub async fn profile_summary(&self) -> String {
        if !self.pipeline.has_documents() {
            return NO_PROFILE_DATA.to_string();
        }
        match self.pipeline.run(PipelineState::new(PROFILE_SUMMARY_QUESTION)).await {
            Ok(state) => state.answer,
            Err(e) => {
                warn!(error = %e, "Profile summary failed; using fallback");
                SUMMARY_FALLBACK.to_string()
            }
        }
    }
}

async fn send_error(tx: &mpsc::Sender<StreamEvent>) {
    let _ = tx
        .send(StreamEvent::Error {
            message: ERROR_ANSWER.to_string(),
        })
        .await;
}
