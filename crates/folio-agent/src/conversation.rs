//! Per-session conversation memory.
//!
//! Exchanges are condensed into short summaries by the chat model, embedded,
//! and stored in their own collection tagged with the session id. Later
//! questions from the same session retrieve the most relevant summaries.
//! Like the cache, memory is best effort: nothing here fails a request.

use crate::llm::LlmClient;
use crate::prompt::summary_prompt;
use crate::topics::extract_topics;
use folio_core::{ChatMessage, FolioResult, Outcome};
use folio_memory::cache::truncate_bytes;
use folio_memory::index::SearchHit;
use folio_memory::{
    CollectionSchema, EmbeddingProvider, FieldSchema, Filter, IndexSpec, Payload, Record,
    SearchRequest, VectorIndex,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Default collection holding conversation summaries.
pub const DEFAULT_MEMORY_COLLECTION: &str = "conversation_memory";
/// Default number of summaries returned per lookup.
pub const DEFAULT_MEMORY_K: usize = 3;
/// Number of recent messages that triggers a summary write.
pub const DEFAULT_SUMMARY_TRIGGER: usize = 4;

const SUMMARY_FIELD: &str = "summary";
const SESSION_FIELD: &str = "session_id";
const TIMESTAMP_FIELD: &str = "timestamp";
const MESSAGE_COUNT_FIELD: &str = "message_count";
const TOPICS_FIELD: &str = "topics";

const SUMMARY_MAX_BYTES: usize = 4096;
const SESSION_MAX_BYTES: usize = 256;
const TOPICS_MAX_BYTES: usize = 512;

/// Conversation memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Collection holding summaries.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Summaries returned per lookup.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Recent-message count at which an exchange is summarised.
    #[serde(default = "default_summary_trigger")]
    pub summary_trigger: usize,
}

fn default_collection() -> String {
    DEFAULT_MEMORY_COLLECTION.to_string()
}

fn default_k() -> usize {
    DEFAULT_MEMORY_K
}

fn default_summary_trigger() -> usize {
    DEFAULT_SUMMARY_TRIGGER
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            k: default_k(),
            summary_trigger: default_summary_trigger(),
        }
    }
}

/// A stored conversation summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Primary key assigned by the index.
    pub id: i64,
    /// Summary text.
    pub summary: String,
    /// Session the summary belongs to.
    pub session_id: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Messages in the summarised exchange.
    pub message_count: usize,
    /// Topics mentioned in the summary.
    pub topics: Vec<String>,
}

impl MemoryEntry {
    fn from_hit(hit: &SearchHit) -> Self {
        fn field<'a>(hit: &'a SearchHit, name: &str) -> &'a str {
            hit.str_field(name).unwrap_or_default()
        }
        Self {
            id: hit.id,
            summary: field(hit, SUMMARY_FIELD).to_string(),
            session_id: field(hit, SESSION_FIELD).to_string(),
            timestamp_ms: field(hit, TIMESTAMP_FIELD).parse().unwrap_or_default(),
            message_count: field(hit, MESSAGE_COUNT_FIELD).parse().unwrap_or_default(),
            topics: field(hit, TOPICS_FIELD)
                .split(',')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    // Timestamp and count are stored as strings.
    fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        let mut put = |name: &str, value: String| {
            payload.insert(name.to_string(), Value::String(value));
        };
        put(SUMMARY_FIELD, truncate_bytes(&self.summary, SUMMARY_MAX_BYTES).to_string());
        put(SESSION_FIELD, self.session_id.clone());
        put(TIMESTAMP_FIELD, self.timestamp_ms.to_string());
        put(MESSAGE_COUNT_FIELD, self.message_count.to_string());
        put(
            TOPICS_FIELD,
            truncate_bytes(&self.topics.join(","), TOPICS_MAX_BYTES).to_string(),
        );
        payload
    }
}

/// Schema of the conversation-memory collection.
pub fn memory_schema(collection: &str, dimension: usize) -> CollectionSchema {
    CollectionSchema::new(collection, "Conversation summaries per session")
        .field(FieldSchema::primary_key())
        .field(FieldSchema::vector(dimension))
        .field(FieldSchema::varchar(SUMMARY_FIELD, SUMMARY_MAX_BYTES))
        .field(FieldSchema::varchar(SESSION_FIELD, SESSION_MAX_BYTES))
        .field(FieldSchema::varchar(TIMESTAMP_FIELD, 32))
        .field(FieldSchema::varchar(MESSAGE_COUNT_FIELD, 16))
        .field(FieldSchema::varchar(TOPICS_FIELD, TOPICS_MAX_BYTES))
}

/// Summarise an exchange with one model call.
pub async fn summarize_conversation(llm: &LlmClient, messages: &[ChatMessage]) -> FolioResult<String> {
    let summary = llm.complete(&summary_prompt(messages)).await?;
    Ok(summary.trim().to_string())
}

struct MemoryBackend {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<LlmClient>,
    ready: OnceCell<()>,
}

/// Session-scoped summaries of past exchanges, searchable by similarity.
pub struct ConversationMemory {
    backend: Option<MemoryBackend>,
    config: MemoryConfig,
}

impl ConversationMemory {
    /// Memory stored in `index`, summarised with `llm`.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<LlmClient>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            backend: Some(MemoryBackend {
                index,
                embedder,
                llm,
                ready: OnceCell::new(),
            }),
            config,
        }
    }

    /// Memory with no index: lookups are empty and summaries are skipped.
    pub fn disabled(config: MemoryConfig) -> Self {
        Self {
            backend: None,
            config,
        }
    }

    /// Whether an index backs this memory.
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Settings in use.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Whether an exchange of `message_count` messages should be summarised.
    pub fn should_summarize(&self, message_count: usize) -> bool {
        message_count >= self.config.summary_trigger
    }

    /// Ensure the collection exists now rather than on first use.
    pub async fn initialize(&self) -> Outcome<()> {
        let Some(backend) = &self.backend else {
            return Outcome::Disabled;
        };
        let outcome: Outcome<()> = self.ensure_ready(backend).await.into();
        match &outcome {
            Outcome::Ready(()) => {
                info!(collection = %self.config.collection, "Conversation memory ready");
            }
            Outcome::Failed(e) => {
                warn!(error = %e, "Conversation memory initialization failed; will retry on next use");
            }
            Outcome::Disabled => {}
        }
        outcome
    }

    async fn ensure_ready(&self, backend: &MemoryBackend) -> FolioResult<()> {
        backend
            .ready
            .get_or_try_init(|| async {
                let schema = memory_schema(&self.config.collection, backend.embedder.dimension());
                backend
                    .index
                    .ensure_collection(&schema, &IndexSpec::cosine_autoindex())
                    .await
            })
            .await
            .map(|_| ())
    }

    /// Summaries from `session_id` most relevant to `query`, with degraded
    /// states reported explicitly.
    pub async fn lookup_context(
        &self,
        query: &str,
        session_id: &str,
        k: usize,
    ) -> Outcome<Vec<MemoryEntry>> {
        let Some(backend) = &self.backend else {
            return Outcome::Disabled;
        };
        self.lookup_in(backend, query, session_id, k).await.into()
    }

    async fn lookup_in(
        &self,
        backend: &MemoryBackend,
        query: &str,
        session_id: &str,
        k: usize,
    ) -> FolioResult<Vec<MemoryEntry>> {
        self.ensure_ready(backend).await?;
        let vector = backend.embedder.embed(query).await?;
        let request = SearchRequest::new(vector, k)
            .with_filter(Filter::eq(SESSION_FIELD, session_id))
            .with_output_fields(&[
                SUMMARY_FIELD,
                SESSION_FIELD,
                TIMESTAMP_FIELD,
                MESSAGE_COUNT_FIELD,
                TOPICS_FIELD,
            ]);
        let hits = backend
            .index
            .search(&self.config.collection, &request)
            .await?;

        // The index applies the filter; rows are re-checked so another
        // session's summary can never leak through.
        let entries: Vec<MemoryEntry> = hits
            .iter()
            .map(MemoryEntry::from_hit)
            .filter(|entry| entry.session_id == session_id)
            .collect();
        if !entries.is_empty() {
            debug!(session_id, count = entries.len(), "Retrieved conversation summaries");
        }
        Ok(entries)
    }

    /// Up to `k` summaries from `session_id`; empty on any problem.
    pub async fn retrieve_relevant_context(
        &self,
        query: &str,
        session_id: &str,
        k: usize,
    ) -> Vec<MemoryEntry> {
        match self.lookup_context(query, session_id, k).await {
            Outcome::Ready(entries) => entries,
            Outcome::Disabled => Vec::new(),
            Outcome::Failed(e) => {
                warn!(error = %e, session_id, "Conversation memory lookup failed");
                Vec::new()
            }
        }
    }

    /// Summarise `messages` and store the summary, reporting the outcome.
    pub async fn record_summary(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
    ) -> Outcome<MemoryEntry> {
        let Some(backend) = &self.backend else {
            return Outcome::Disabled;
        };
        self.record_in(backend, session_id, messages).await.into()
    }

    async fn record_in(
        &self,
        backend: &MemoryBackend,
        session_id: &str,
        messages: &[ChatMessage],
    ) -> FolioResult<MemoryEntry> {
        self.ensure_ready(backend).await?;

        let summary = summarize_conversation(&backend.llm, messages).await?;
        let vector = backend.embedder.embed(&summary).await?;
        let mut entry = MemoryEntry {
            id: 0,
            topics: extract_topics(&summary),
            summary,
            session_id: session_id.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            message_count: messages.len(),
        };

        backend
            .index
            .insert(
                &self.config.collection,
                vec![Record::new(vector, entry.to_payload())],
            )
            .await?;
        entry.summary = truncate_bytes(&entry.summary, SUMMARY_MAX_BYTES).to_string();

        info!(
            session_id,
            messages = messages.len(),
            topics = %entry.topics.join(","),
            "Stored conversation summary"
        );
        Ok(entry)
    }

    /// Summarise and store; failures are logged and dropped.
    pub async fn store_summary(&self, session_id: &str, messages: &[ChatMessage]) {
        match self.record_summary(session_id, messages).await {
            Outcome::Ready(_) => {}
            Outcome::Disabled => debug!("Conversation memory disabled; summary skipped"),
            Outcome::Failed(e) => warn!(error = %e, session_id, "Storing conversation summary failed"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use folio_core::FolioError;
    use crate::backends::LlmBackend;
    use crate::stream::StreamEvent;
    use async_trait::async_trait;
    use folio_memory::{InMemoryVectorIndex, LocalEmbedding};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    /// Echoes a fixed summary and records the prompts it received.
    struct FixedLlm {
        reply: String,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LlmBackend for FixedLlm {
        async fn complete(&self, prompt: &str) -> FolioResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }

        async fn complete_stream(
            &self,
            _prompt: &str,
        ) -> FolioResult<(mpsc::Receiver<StreamEvent>, JoinHandle<FolioResult<String>>)> {
            Err(FolioError::Llm("not used".into()))
        }
    }

    fn make_memory(reply: &str) -> (ConversationMemory, Arc<InMemoryVectorIndex>, Arc<Mutex<Vec<String>>>) {
        let index = Arc::new(InMemoryVectorIndex::new());
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let llm = LlmClient::from_backend(Box::new(FixedLlm {
            reply: reply.to_string(),
            prompts: prompts.clone(),
        }));
        let memory = ConversationMemory::new(
            index.clone(),
            Arc::new(LocalEmbedding::new(64)),
            Arc::new(llm),
            MemoryConfig::default(),
        );
        (memory, index, prompts)
    }

    fn exchange() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("What is your Python experience?"),
            ChatMessage::assistant("Five years building APIs."),
        ]
    }

    #[tokio::test]
    async fn test_record_summary_stores_entry() {
        let (memory, index, prompts) =
            make_memory("  The user asked about Python and Docker experience.  ");
        let entry = memory.record_summary("s1", &exchange()).await.ready().unwrap();

        assert_eq!(entry.summary, "The user asked about Python and Docker experience.");
        assert_eq!(entry.message_count, 2);
        assert_eq!(entry.topics, vec!["The", "Python", "Docker"]);
        assert!(entry.timestamp_ms > 0);
        assert_eq!(index.count(DEFAULT_MEMORY_COLLECTION).await.unwrap(), 1);
        assert!(prompts.lock().unwrap()[0].contains("User: What is your Python experience?"));
    }

    #[tokio::test]
    async fn test_retrieval_is_scoped_to_session() {
        let (memory, _, _) = make_memory("The user asked about Python backend work.");
        memory.store_summary("session-a", &exchange()).await;
        memory.store_summary("session-b", &exchange()).await;

        let a = memory
            .retrieve_relevant_context("Python backend", "session-a", 3)
            .await;
        assert_eq!(a.len(), 1);
        assert!(a.iter().all(|e| e.session_id == "session-a"));
        assert_eq!(a[0].message_count, 2);

        let none = memory
            .retrieve_relevant_context("Python backend", "session-c", 3)
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_short_exchanges_are_accepted() {
        let (memory, index, _) = make_memory("The user said hello.");
        memory
            .store_summary("s1", &[ChatMessage::user("hello")])
            .await;
        assert_eq!(index.count(DEFAULT_MEMORY_COLLECTION).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_exchange_still_stores_summary() {
        let (memory, index, prompts) = make_memory("No conversation yet.");
        memory.store_summary("s1", &[]).await;
        assert_eq!(index.count(DEFAULT_MEMORY_COLLECTION).await.unwrap(), 1);
        assert_eq!(prompts.lock().unwrap().len(), 1);

        let entry = memory.record_summary("s1", &[]).await.ready().unwrap();
        assert_eq!(entry.message_count, 0);
        assert_eq!(entry.summary, "No conversation yet.");
    }

    #[tokio::test]
    async fn test_disabled_memory() {
        let memory = ConversationMemory::disabled(MemoryConfig::default());
        assert!(!memory.is_enabled());
        assert!(memory.initialize().await.is_disabled());
        assert!(memory.lookup_context("q", "s", 3).await.is_disabled());
        assert!(memory.retrieve_relevant_context("q", "s", 3).await.is_empty());
        assert!(memory.record_summary("s", &exchange()).await.is_disabled());
        memory.store_summary("s", &exchange()).await;
    }

    #[tokio::test]
    async fn test_unavailable_index_is_absorbed() {
        let (memory, index, _) = make_memory("The user asked about React.");
        index.set_available(false);
        assert!(memory.lookup_context("React", "s", 3).await.is_failed());
        assert!(memory.retrieve_relevant_context("React", "s", 3).await.is_empty());
        memory.store_summary("s", &exchange()).await;

        index.set_available(true);
        memory.store_summary("s", &exchange()).await;
        assert_eq!(memory.retrieve_relevant_context("React", "s", 3).await.len(), 1);
    }

    #[test]
    fn test_summary_trigger() {
        let memory = ConversationMemory::disabled(MemoryConfig::default());
        assert!(!memory.should_summarize(3));
        assert!(memory.should_summarize(4));
        assert!(memory.should_summarize(6));
    }

    #[test]
    fn test_entry_payload_matches_schema() {
        let entry = MemoryEntry {
            id: 0,
            summary: "s".repeat(5000),
            session_id: "abc".into(),
            timestamp_ms: 1_700_000_000_000,
            message_count: 4,
            topics: vec!["Python".into(), "AWS".into()],
        };
        let record = Record::new(vec![0.0; 8], entry.to_payload());
        assert!(memory_schema("m", 8).validate(&record).is_ok());
        assert_eq!(record.payload["topics"], "Python,AWS");
        assert_eq!(record.payload["timestamp"], "1700000000000");
    }
}
