//! Vector storage, embeddings and the semantic cache for Folio.
//!
//! Everything that touches a vector collection lives here: the index
//! contract and its two engines, the answer cache, the profile-document
//! schema and retriever, and ingestion.
//!
//! # Main types
//!
//! - [`VectorIndex`]: Trait for collection-oriented vector engines.
//! - [`InMemoryVectorIndex`]: In-process engine for local runs and tests.
//! - [`MilvusVectorIndex`]: Milvus / Zilliz REST engine.
//! - [`EmbeddingProvider`]: Trait for text embedding models.
//! - [`SemanticCache`]: Similarity-keyed answer cache with degraded mode.
//! - [`DocumentRetriever`]: Top-k profile chunk retrieval.
//! - [`Ingestor`]: Loads and splits profile documents (text, Markdown, PDF)
//!   into the index.

/// Similarity-keyed answer cache.
pub mod cache;
/// Profile-document schema and retrieval.
pub mod documents;
/// Embedding provider trait, local and OpenAI implementations.
pub mod embedding;
/// Vector-index contract types.
pub mod index;
/// Document ingestion and text splitting.
pub mod ingest;
/// Milvus REST engine.
pub mod milvus;
/// Per-page PDF text extraction.
pub mod pdf;
/// In-memory engine.
pub mod store;

pub use cache::{CacheConfig, CacheHit, CacheLookup, SemanticCache};
pub use documents::{DocumentChunk, DocumentMetadata, DocumentRetriever};
pub use embedding::{EmbeddingConfig, EmbeddingProvider, LocalEmbedding, OpenAiEmbedding};
pub use index::{
    CollectionSchema, FieldSchema, FieldType, Filter, IndexSpec, Payload, Record, SearchHit,
    SearchRequest, VectorIndex,
};
pub use ingest::{IngestReport, Ingestor, TextSplitter};
pub use milvus::MilvusVectorIndex;
pub use store::InMemoryVectorIndex;
