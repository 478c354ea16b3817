//! Similarity-keyed answer cache.
//!
//! Questions are embedded and matched against previously answered ones with
//! top-1 cosine search. A match at or above the threshold returns the stored
//! answer. The cache is best effort: every failure degrades to a miss or a
//! dropped write, and a cache built without an index is permanently disabled.

use crate::embedding::EmbeddingProvider;
use crate::index::{
    CollectionSchema, FieldSchema, IndexSpec, Payload, Record, SearchRequest, VectorIndex,
};
use folio_core::{FolioResult, Outcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Default cache collection name.
pub const DEFAULT_CACHE_COLLECTION: &str = "semantic_cache";
/// Default minimum cosine similarity for a hit.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.75;
/// Upper bound for stored questions, in bytes.
pub const MAX_QUESTION_BYTES: usize = 1000;
/// Upper bound for stored answers, in bytes.
pub const MAX_ANSWER_BYTES: usize = 65_535;

// Scores this far below the threshold still count as hits, so a question
// always matches its own stored vector despite float rounding.
const SCORE_TOLERANCE: f32 = 1e-6;

const QUESTION_FIELD: &str = "question";
const ANSWER_FIELD: &str = "answer";

/// Cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Collection holding cached answers.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Minimum similarity for a hit, in `[0, 1]`.
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f32,
}

fn default_collection() -> String {
    DEFAULT_CACHE_COLLECTION.to_string()
}

fn default_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            similarity_threshold: default_threshold(),
        }
    }
}

/// A cached answer close enough to the question.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    /// The stored answer.
    pub answer: String,
    /// The question the answer was stored for.
    pub matched_question: String,
    /// Cosine similarity to the incoming question.
    pub score: f32,
}

/// Result of a cache lookup that reached the index.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A stored answer cleared the threshold.
    Hit(CacheHit),
    /// Nothing cleared the threshold; carries the best score seen, if any.
    Miss {
        /// Score of the nearest entry, when the cache is non-empty.
        best_score: Option<f32>,
    },
}

impl CacheLookup {
    /// The cached answer on a hit.
    pub fn into_answer(self) -> Option<String> {
        match self {
            CacheLookup::Hit(hit) => Some(hit.answer),
            CacheLookup::Miss { .. } => None,
        }
    }
}

struct CacheBackend {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    ready: OnceCell<()>,
}

/// Semantic cache over a vector index collection.
pub struct SemanticCache {
    backend: Option<CacheBackend>,
    config: CacheConfig,
}

impl SemanticCache {
    /// Cache backed by `index`, embedding questions with `embedder`.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: CacheConfig,
    ) -> Self {
        Self {
            backend: Some(CacheBackend {
                index,
                embedder,
                ready: OnceCell::new(),
            }),
            config,
        }
    }

    /// Cache with no index: every lookup misses and every write is dropped.
    pub fn disabled(config: CacheConfig) -> Self {
        Self {
            backend: None,
            config,
        }
    }

    /// Whether the cache has a backing index.
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Active settings.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Ensure the collection exists now rather than on first use.
    pub async fn initialize(&self) -> Outcome<()> {
        let Some(backend) = &self.backend else {
            return Outcome::Disabled;
        };
        match self.ensure_ready(backend).await {
            Ok(()) => {
                info!(collection = %self.config.collection, "Semantic cache ready");
                Outcome::Ready(())
            }
            Err(e) => {
                warn!(error = %e, "Semantic cache initialization failed; will retry on next use");
                Outcome::Failed(e)
            }
        }
    }

    async fn ensure_ready(&self, backend: &CacheBackend) -> FolioResult<()> {
        backend
            .ready
            .get_or_try_init(|| async {
                let schema = cache_schema(&self.config.collection, backend.embedder.dimension());
                backend
                    .index
                    .ensure_collection(&schema, &IndexSpec::cosine_autoindex())
                    .await
            })
            .await
            .map(|_| ())
    }

    /// Look up a cached answer, reporting degraded states explicitly.
    pub async fn lookup(&self, question: &str) -> Outcome<CacheLookup> {
        let Some(backend) = &self.backend else {
            return Outcome::Disabled;
        };
        self.lookup_in(backend, question).await.into()
    }

    async fn lookup_in(&self, backend: &CacheBackend, question: &str) -> FolioResult<CacheLookup> {
        self.ensure_ready(backend).await?;
        let vector = backend.embedder.embed(question).await?;
        let request =
            SearchRequest::new(vector, 1).with_output_fields(&[QUESTION_FIELD, ANSWER_FIELD]);
        let hits = backend
            .index
            .search(&self.config.collection, &request)
            .await?;

        let Some(best) = hits.into_iter().next() else {
            debug!("Cache is empty");
            return Ok(CacheLookup::Miss { best_score: None });
        };

        let matched_question = best.str_field(QUESTION_FIELD).unwrap_or_default().to_string();
        debug!(
            query = question,
            matched = %matched_question,
            score = best.score,
            threshold = self.config.similarity_threshold,
            "Cache nearest match"
        );

        if is_hit(best.score, self.config.similarity_threshold) {
            let answer = best.str_field(ANSWER_FIELD).unwrap_or_default().to_string();
            info!(score = best.score, "Cache HIT");
            Ok(CacheLookup::Hit(CacheHit {
                answer,
                matched_question,
                score: best.score,
            }))
        } else {
            info!(score = best.score, "Cache MISS");
            Ok(CacheLookup::Miss {
                best_score: Some(best.score),
            })
        }
    }

    /// Cached answer for `question`, or `None`. Never fails.
    pub async fn search(&self, question: &str) -> Option<String> {
        match self.lookup(question).await {
            Outcome::Ready(lookup) => lookup.into_answer(),
            Outcome::Disabled => None,
            Outcome::Failed(e) => {
                warn!(error = %e, "Cache lookup failed; treating as miss");
                None
            }
        }
    }

    /// Store an answer, reporting degraded states explicitly.
    pub async fn insert(&self, question: &str, answer: &str) -> Outcome<()> {
        let Some(backend) = &self.backend else {
            return Outcome::Disabled;
        };
        self.insert_in(backend, question, answer).await.into()
    }

    async fn insert_in(
        &self,
        backend: &CacheBackend,
        question: &str,
        answer: &str,
    ) -> FolioResult<()> {
        self.ensure_ready(backend).await?;
        let vector = backend.embedder.embed(question).await?;

        let mut payload = Payload::new();
        payload.insert(
            QUESTION_FIELD.to_string(),
            Value::String(truncate_bytes(question, MAX_QUESTION_BYTES).to_string()),
        );
        payload.insert(
            ANSWER_FIELD.to_string(),
            Value::String(truncate_bytes(answer, MAX_ANSWER_BYTES).to_string()),
        );

        backend
            .index
            .insert(&self.config.collection, vec![Record::new(vector, payload)])
            .await?;
        debug!(question, "Cached answer");
        Ok(())
    }

    /// Store an answer; failures are logged and dropped.
    pub async fn add(&self, question: &str, answer: &str) {
        if let Outcome::Failed(e) = self.insert(question, answer).await {
            warn!(error = %e, "Cache write failed; answer not cached");
        }
    }
}

/// Schema of the cache collection.
pub fn cache_schema(collection: &str, dimension: usize) -> CollectionSchema {
    CollectionSchema::new(collection, "Semantic cache for RAG answers")
        .field(FieldSchema::primary_key())
        .field(FieldSchema::vector(dimension))
        .field(FieldSchema::varchar(QUESTION_FIELD, MAX_QUESTION_BYTES))
        .field(FieldSchema::varchar(ANSWER_FIELD, MAX_ANSWER_BYTES))
}

fn is_hit(score: f32, threshold: f32) -> bool {
    score + SCORE_TOLERANCE >= threshold
}

/// Longest prefix of `s` within `max` bytes that ends on a char boundary.
pub fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
