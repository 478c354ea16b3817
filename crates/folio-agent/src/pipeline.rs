//! Two-stage retrieval-generation pipeline: RETRIEVE then GENERATE.

use crate::conversation::MemoryEntry;
use crate::llm::LlmClient;
use crate::prompt::{answer_prompt, NO_INFORMATION_ANSWER};
use crate::stream::StreamEvent;
use folio_core::{ChatMessage, FolioError, FolioResult};
use folio_memory::{CollectionSchema, DocumentChunk, DocumentRetriever};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Everything one request carries through the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineState {
    /// The caller's question.
    pub question: String,
    /// Chunks filled in by RETRIEVE.
    pub context: Vec<DocumentChunk>,
    /// Answer filled in by GENERATE.
    pub answer: String,
    /// Session the request belongs to.
    pub session_id: Option<String>,
    /// Relevant summaries from earlier in the session.
    pub conversation_context: Vec<MemoryEntry>,
    /// Latest turns sent by the caller.
    pub recent_messages: Vec<ChatMessage>,
}

impl PipelineState {
    /// Fresh state for `question`.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// Attach a session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach earlier summaries and recent turns.
    pub fn with_conversation(
        mut self,
        conversation_context: Vec<MemoryEntry>,
        recent_messages: Vec<ChatMessage>,
    ) -> Self {
        self.conversation_context = conversation_context;
        self.recent_messages = recent_messages;
        self
    }

    fn prompt(&self) -> String {
        answer_prompt(
            &self.question,
            &self.context,
            &self.conversation_context,
            &self.recent_messages,
        )
    }
}

fn stage_error(stage: &str, e: FolioError) -> FolioError {
    match e {
        FolioError::Pipeline(_) => e,
        other => FolioError::Pipeline(format!("{stage} failed: {other}")),
    }
}

fn non_blank(answer: String) -> String {
    if answer.trim().is_empty() {
        NO_INFORMATION_ANSWER.to_string()
    } else {
        answer
    }
}

/// Retrieval-generation pipeline over the profile documents.
pub struct RagPipeline {
    retriever: DocumentRetriever,
    llm: Arc<LlmClient>,
}

impl RagPipeline {
    /// Pipeline retrieving with `retriever` and generating with `llm`.
    pub fn new(retriever: DocumentRetriever, llm: Arc<LlmClient>) -> Self {
        Self { retriever, llm }
    }

    /// Whether a document index is configured at all.
    pub fn has_documents(&self) -> bool {
        self.retriever.is_configured()
    }

    /// Schema of the document collection.
    pub async fn document_schema(&self) -> FolioResult<Option<CollectionSchema>> {
        self.retriever.describe().await
    }

    /// RETRIEVE: fill `context` with the chunks closest to the question.
    pub async fn retrieve(&self, mut state: PipelineState) -> FolioResult<PipelineState> {
        debug!(question = %state.question, "Retrieving");
        state.context = self
            .retriever
            .retrieve(&state.question)
            .await
            .map_err(|e| stage_error("retrieve", e))?;
        Ok(state)
    }

    /// GENERATE: one model call over the retrieved context.
    pub async fn generate(&self, mut state: PipelineState) -> FolioResult<PipelineState> {
        debug!(chunks = state.context.len(), "Generating answer");
        let answer = self
            .llm
            .complete(&state.prompt())
            .await
            .map_err(|e| stage_error("generate", e))?;
        state.answer = non_blank(answer);
        Ok(state)
    }

    /// RETRIEVE then GENERATE.
    pub async fn run(&self, state: PipelineState) -> FolioResult<PipelineState> {
        let state = self.retrieve(state).await?;
        let state = self.generate(state).await?;
        info!(answer_len = state.answer.len(), "Pipeline complete");
        Ok(state)
    }

    /// RETRIEVE, then GENERATE with the answer streamed as it is produced.
    ///
    /// The receiver yields text deltas followed by `Done` or `Error`; the
    /// handle resolves to the final state. Dropping the receiver stops the
    /// generation and makes the handle resolve to an error.
    pub async fn run_streaming(
        &self,
        state: PipelineState,
    ) -> FolioResult<(mpsc::Receiver<StreamEvent>, JoinHandle<FolioResult<PipelineState>>)> {
        let mut state = self.retrieve(state).await?;
        let (mut upstream, completion) = self
            .llm
            .complete_stream(&state.prompt())
            .await
            .map_err(|e| stage_error("generate", e))?;

        let (tx, rx) = mpsc::channel::<StreamEvent>(64);
        let handle = tokio::spawn(async move {
            let gone = || FolioError::Pipeline("answer consumer disconnected".to_string());

            while let Some(event) = upstream.recv().await {
                match event {
                    StreamEvent::TextDelta { text } => {
                        if tx.send(StreamEvent::TextDelta { text }).await.is_err() {
                            return Err(gone());
                        }
                    }
                    StreamEvent::Error { message } => {
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: message.clone(),
                            })
                            .await;
                        return Err(FolioError::Pipeline(format!("generate failed: {message}")));
                    }
                    StreamEvent::Done => break,
                }
            }
            drop(upstream);

            let answer = match completion.await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    let e = stage_error("generate", e);
                    let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                    return Err(e);
                }
                Err(e) => {
                    let e = FolioError::Pipeline(format!("generation task failed: {e}"));
                    let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                    return Err(e);
                }
            };

            if answer.trim().is_empty() {
                let text = NO_INFORMATION_ANSWER.to_string();
                if tx.send(StreamEvent::TextDelta { text }).await.is_err() {
                    return Err(gone());
                }
            }
            state.answer = non_blank(answer);
            if tx.send(StreamEvent::Done).await.is_err() {
                return Err(gone());
            }
            Ok(state)
        });

        Ok((rx, handle))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backends::LlmBackend;
    use crate::prompt::NO_CONTEXT_PLACEHOLDER;
    use async_trait::async_trait;
    use folio_memory::documents::{document_schema, DEFAULT_DOCUMENT_COLLECTION};
    use folio_memory::{
        DocumentMetadata, EmbeddingProvider, IndexSpec, InMemoryVectorIndex, LocalEmbedding,
        VectorIndex,
    };
    use std::sync::Mutex;

    /// Replies with a fixed text, streamed word by word, and keeps prompts.
    struct ScriptedLlm {
        reply: String,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LlmBackend for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> FolioResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }

        async fn complete_stream(
            &self,
            prompt: &str,
        ) -> FolioResult<(mpsc::Receiver<StreamEvent>, JoinHandle<FolioResult<String>>)> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let (tx, rx) = mpsc::channel(16);
            let reply = self.reply.clone();
            let handle = tokio::spawn(async move {
                for word in reply.split_inclusive(' ') {
                    if tx.send(StreamEvent::TextDelta { text: word.to_string() }).await.is_err() {
                        return Err(FolioError::Llm("receiver dropped".into()));
                    }
                }
                let _ = tx.send(StreamEvent::Done).await;
                Ok(reply)
            });
            Ok((rx, handle))
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmBackend for FailingLlm {
        async fn complete(&self, _prompt: &str) -> FolioResult<String> {
            Err(FolioError::Llm("rate limited".into()))
        }

        async fn complete_stream(
            &self,
            _prompt: &str,
        ) -> FolioResult<(mpsc::Receiver<StreamEvent>, JoinHandle<FolioResult<String>>)> {
            Err(FolioError::Llm("rate limited".into()))
        }
    }

    async fn pipeline_with(
        docs: &[&str],
        backend: Box<dyn LlmBackend>,
    ) -> RagPipeline {
        let index = Arc::new(InMemoryVectorIndex::new());
        let embedder = Arc::new(LocalEmbedding::new(64));
        index
            .ensure_collection(
                &document_schema(DEFAULT_DOCUMENT_COLLECTION, 64),
                &IndexSpec::cosine_autoindex(),
            )
            .await
            .unwrap();
        for doc in docs {
            let chunk = DocumentChunk::new(*doc, DocumentMetadata::for_source("cv.md"));
            let record = chunk.to_record(embedder.embed(doc).await.unwrap()).unwrap();
            index
                .insert(DEFAULT_DOCUMENT_COLLECTION, vec![record])
                .await
                .unwrap();
        }
        let retriever = DocumentRetriever::new(Some(index), embedder, DEFAULT_DOCUMENT_COLLECTION);
        RagPipeline::new(retriever, Arc::new(LlmClient::from_backend(backend)))
    }

    fn scripted(reply: &str) -> (Box<dyn LlmBackend>, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let backend = ScriptedLlm {
            reply: reply.to_string(),
            prompts: prompts.clone(),
        };
        (Box::new(backend), prompts)
    }

    #[tokio::test]
    async fn test_run_retrieves_then_generates() {
        let (backend, prompts) = scripted("I have five years of Python experience.");
        let pipeline = pipeline_with(&["Five years of Python at Acme."], backend).await;

        let state = pipeline
            .run(PipelineState::new("What is your Python experience?"))
            .await
            .unwrap();
        assert_eq!(state.context.len(), 1);
        assert_eq!(state.answer, "I have five years of Python experience.");
        assert!(prompts.lock().unwrap()[0].contains("Five years of Python at Acme."));
    }

    #[tokio::test]
    async fn test_empty_collection_still_answers() {
        let (backend, prompts) = scripted("   ");
        let pipeline = pipeline_with(&[], backend).await;

        let state = pipeline.run(PipelineState::new("Where did you study?")).await.unwrap();
        assert!(state.context.is_empty());
        assert_eq!(state.answer, NO_INFORMATION_ANSWER);
        assert!(prompts.lock().unwrap()[0].contains(NO_CONTEXT_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_generation_failure_is_pipeline_error() {
        let pipeline = pipeline_with(&["anything"], Box::new(FailingLlm)).await;
        let err = pipeline.run(PipelineState::new("q")).await.unwrap_err();
        assert!(matches!(err, FolioError::Pipeline(_)));
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_history_reaches_prompt() {
        let (backend, prompts) = scripted("Sure.");
        let pipeline = pipeline_with(&[], backend).await;
        let state = PipelineState::new("And Docker?").with_session("s1").with_conversation(
            Vec::new(),
            vec![ChatMessage::user("Python?"), ChatMessage::assistant("Yes.")],
        );
        pipeline.run(state).await.unwrap();
        assert!(prompts.lock().unwrap()[0].contains("- User: Python?"));
    }

    #[tokio::test]
    async fn test_streaming_yields_deltas_then_done() {
        let (backend, _) = scripted("I build APIs with FastAPI.");
        let pipeline = pipeline_with(&["FastAPI services"], backend).await;

        let (mut rx, handle) = pipeline
            .run_streaming(PipelineState::new("What do you build?"))
            .await
            .unwrap();
        let mut text = String::new();
        let mut last = None;
        while let Some(event) = rx.recv().await {
            if let StreamEvent::TextDelta { text: t } = &event {
                text.push_str(t);
            }
            last = Some(event);
        }
        assert_eq!(text, "I build APIs with FastAPI.");
        assert_eq!(last, Some(StreamEvent::Done));

        let state = handle.await.unwrap().unwrap();
        assert_eq!(state.answer, "I build APIs with FastAPI.");
        assert_eq!(state.context.len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_blank_answer_is_replaced() {
        let (backend, _) = scripted("");
        let pipeline = pipeline_with(&[], backend).await;
        let (mut rx, handle) = pipeline.run_streaming(PipelineState::new("q")).await.unwrap();
        let mut text = String::new();
        while let Some(event) = rx.recv().await {
            if let StreamEvent::TextDelta { text: t } = event {
                text.push_str(&t);
            }
        }
        assert_eq!(text, NO_INFORMATION_ANSWER);
        assert_eq!(handle.await.unwrap().unwrap().answer, NO_INFORMATION_ANSWER);
    }

    #[tokio::test]
    async fn test_streaming_stops_when_consumer_leaves() {
        let reply = "word ".repeat(500);
        let (backend, _) = scripted(&reply);
        let pipeline = pipeline_with(&[], backend).await;
        let (rx, handle) = pipeline.run_streaming(PipelineState::new("q")).await.unwrap();
        drop(rx);
        assert!(handle.await.unwrap().is_err());
    }
}
