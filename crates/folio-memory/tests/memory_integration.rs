#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the folio-memory crate.
//!
//! Covers ingestion from disk into an index, document retrieval over the
//! ingested collection, and semantic cache behaviour under concurrency.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use folio_core::{FolioError, Outcome};
use folio_memory::documents::DEFAULT_DOCUMENT_COLLECTION;
use folio_memory::{
    CacheConfig, CacheLookup, DocumentRetriever, EmbeddingProvider, Ingestor, InMemoryVectorIndex,
    LocalEmbedding, SemanticCache, TextSplitter, VectorIndex,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn embedder() -> Arc<dyn EmbeddingProvider> {
    Arc::new(LocalEmbedding::new(128))
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

// ---------------------------------------------------------------------------
// 1. Ingestion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ingest_directory_recursively_and_retrieve() {
    let tmp = TempDir::new().unwrap();
    write(
        &tmp,
        "cv.md",
        "I am a backend engineer.\n\nI have five years of Python and FastAPI experience.",
    );
    write(&tmp, "projects/docker.txt", "I containerised every service with Docker.");
    write(&tmp, "photo.png", "not text");

    let index = Arc::new(InMemoryVectorIndex::new());
    let ingestor = Ingestor::new(index.clone(), embedder(), DEFAULT_DOCUMENT_COLLECTION);
    let report = ingestor
        .ingest(None, &[tmp.path().to_path_buf()])
        .await
        .unwrap();

    assert_eq!(report.files.len(), 2);
    assert_eq!(report.total_chunks, 2);
    assert_eq!(index.count(DEFAULT_DOCUMENT_COLLECTION).await.unwrap(), 2);

    let retriever = DocumentRetriever::new(Some(index), embedder(), DEFAULT_DOCUMENT_COLLECTION);
    let chunks = retriever.retrieve("Docker services").await.unwrap();
    assert_eq!(chunks.len(), 2);
    assert!(chunks[0].page_content.contains("Docker"));
    assert!(chunks[0].metadata.source.ends_with("docker.txt"));
    assert_eq!(chunks[0].metadata.keywords, "portfolio");
}

#[tokio::test]
async fn ingest_single_file_splits_long_text() {
    let tmp = TempDir::new().unwrap();
    let paragraph = "I design APIs and deploy them to AWS. ".repeat(10);
    let path = write(&tmp, "long.txt", &format!("{paragraph}\n\n{paragraph}\n\n{paragraph}"));

    let index = Arc::new(InMemoryVectorIndex::new());
    let ingestor = Ingestor::new(index.clone(), embedder(), "docs")
        .with_splitter(TextSplitter::new(500, 50));
    let report = ingestor.ingest(Some(&path), &[]).await.unwrap();

    assert_eq!(report.files, vec![path]);
    assert!(report.total_chunks >= 2);
    let schema = index.describe("docs").await.unwrap().unwrap();
    assert_eq!(schema.dimension(), Some(128));
}

#[tokio::test]
async fn ingest_without_supported_files_fails() {
    let tmp = TempDir::new().unwrap();
    write(&tmp, "image.jpg", "binary");

    let ingestor = Ingestor::new(Arc::new(InMemoryVectorIndex::new()), embedder(), "docs");
    let err = ingestor
        .ingest(None, &[tmp.path().to_path_buf()])
        .await
        .unwrap_err();
    assert!(matches!(err, FolioError::Ingest(_)));
}

#[tokio::test]
async fn ingest_into_unavailable_index_fails() {
    let tmp = TempDir::new().unwrap();
    let path = write(&tmp, "cv.md", "Python developer");

    let index = Arc::new(InMemoryVectorIndex::new());
    index.set_available(false);
    let ingestor = Ingestor::new(index, embedder(), "docs");
    assert!(ingestor.ingest(Some(&path), &[]).await.is_err());
}

// ---------------------------------------------------------------------------
// 2. Semantic cache
// ---------------------------------------------------------------------------

fn cache_over(index: Arc<InMemoryVectorIndex>) -> SemanticCache {
    SemanticCache::new(index, embedder(), CacheConfig::default())
}

#[tokio::test]
async fn cache_scenario_python_hit_weather_miss() {
    let cache = cache_over(Arc::new(InMemoryVectorIndex::new()));
    let question = "What is your Python experience?";

    assert!(cache.search(question).await.is_none());
    cache
        .add(question, "I have five years of Python experience.")
        .await;

    assert_eq!(
        cache.search(question).await.as_deref(),
        Some("I have five years of Python experience.")
    );
    assert!(cache.search("What's the weather today?").await.is_none());
}

#[tokio::test]
async fn cache_paraphrase_above_threshold_shares_answer() {
    let cache = SemanticCache::new(
        Arc::new(InMemoryVectorIndex::new()),
        embedder(),
        CacheConfig {
            similarity_threshold: 0.5,
            ..CacheConfig::default()
        },
    );
    cache
        .add("Python backend experience", "Five years of backend work.")
        .await;

    match cache.lookup("python backend experience please").await {
        Outcome::Ready(CacheLookup::Hit(hit)) => {
            assert!(hit.score >= 0.5);
            assert_eq!(hit.matched_question, "Python backend experience");
            assert_eq!(hit.answer, "Five years of backend work.");
        }
        other => panic!("expected hit, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_identical_requests_both_miss_then_hit() {
    let index = Arc::new(InMemoryVectorIndex::new());
    let cache = Arc::new(cache_over(index.clone()));
    assert!(cache.initialize().await.is_ready());

    let question = "Which databases have you used?";
    let (a, b) = tokio::join!(cache.search(question), cache.search(question));
    assert!(a.is_none() && b.is_none());

    let (c1, c2) = (cache.clone(), cache.clone());
    let t1 = tokio::spawn(async move { c1.add(question, "PostgreSQL").await });
    let t2 = tokio::spawn(async move { c2.add(question, "PostgreSQL").await });
    t1.await.unwrap();
    t2.await.unwrap();

    assert_eq!(index.count("semantic_cache").await.unwrap(), 2);
    assert_eq!(cache.search(question).await.as_deref(), Some("PostgreSQL"));
}

#[tokio::test]
async fn latest_duplicate_wins_tie() {
    let cache = cache_over(Arc::new(InMemoryVectorIndex::new()));
    cache.add("Where do you work?", "Acme").await;
    cache.add("Where do you work?", "Globex").await;
    assert_eq!(cache.search("Where do you work?").await.as_deref(), Some("Globex"));
}
