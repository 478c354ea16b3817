use crate::index::{
    cosine_similarity, rank_hits, CollectionSchema, IndexSpec, Payload, Record, SearchHit,
    SearchRequest, VectorIndex,
};
use async_trait::async_trait;
use folio_core::{FolioError, FolioResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

struct StoredRow {
    id: i64,
    vector: Vec<f32>,
    payload: Payload,
}

struct Collection {
    schema: CollectionSchema,
    rows: Vec<StoredRow>,
    next_id: i64,
}

/// In-process vector index using brute-force cosine similarity.
/// Suitable for local runs, tests and small profiles.
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
    available: AtomicBool,
}

impl InMemoryVectorIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the engine going away (or coming back).
    /// While unavailable every call fails with [`FolioError::Http`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> FolioResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FolioError::Http("vector index unavailable".to_string()))
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(collection: &str) -> FolioError {
    FolioError::VectorIndex(format!("collection not found: {collection}"))
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(
        &self,
        schema: &CollectionSchema,
        _index: &IndexSpec,
    ) -> FolioResult<()> {
        self.check_available()?;
        if schema.dimension().is_none() {
            return Err(FolioError::VectorIndex(format!(
                "collection {} has no vector field",
                schema.name
            )));
        }
        let mut collections = self.collections.write().await;
        collections
            .entry(schema.name.clone())
            .or_insert_with(|| Collection {
                schema: schema.clone(),
                rows: Vec::new(),
                next_id: 1,
            });
        Ok(())
    }

    async fn describe(&self, collection: &str) -> FolioResult<Option<CollectionSchema>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map(|c| c.schema.clone()))
    }

    async fn search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> FolioResult<Vec<SearchHit>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let coll = collections.get(collection).ok_or_else(|| not_found(collection))?;

        let dim = coll.schema.dimension().unwrap_or_default();
        if request.vector.len() != dim {
            return Err(FolioError::VectorIndex(format!(
                "query dimension mismatch for {collection}: expected {dim}, got {}",
                request.vector.len()
            )));
        }

        let mut hits: Vec<SearchHit> = coll
            .rows
            .iter()
            .filter(|row| {
                request
                    .filter
                    .as_ref()
                    .map_or(true, |f| f.matches(&row.payload))
            })
            .map(|row| SearchHit {
                id: row.id,
                score: cosine_similarity(&request.vector, &row.vector),
                payload: row
                    .payload
                    .iter()
                    .filter(|(k, _)| request.output_fields.iter().any(|f| f == *k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
            .collect();

        rank_hits(&mut hits, request.limit);
        Ok(hits)
    }

    async fn insert(&self, collection: &str, records: Vec<Record>) -> FolioResult<usize> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;

        // All-or-nothing: validate the batch before touching the rows.
        for record in &records {
            coll.schema.validate(record)?;
        }

        let inserted = records.len();
        for record in records {
            let id = coll.next_id;
            coll.next_id += 1;
            coll.rows.push(StoredRow {
                id,
                vector: record.vector,
                payload: record.payload,
            });
        }
        Ok(inserted)
    }

    async fn count(&self, collection: &str) -> FolioResult<usize> {
        self.check_available()?;
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.rows.len())
            .ok_or_else(|| not_found(collection))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::index::{FieldSchema, Filter};
    use serde_json::json;

    fn schema() -> CollectionSchema {
        CollectionSchema::new("notes", "test notes")
            .field(FieldSchema::primary_key())
            .field(FieldSchema::vector(3))
            .field(FieldSchema::varchar("text", 100))
            .field(FieldSchema::varchar("session_id", 100))
    }

    fn make_record(text: &str, vector: Vec<f32>, session: &str) -> Record {
        let payload = json!({"text": text, "session_id": session});
        Record::new(vector, payload.as_object().cloned().unwrap())
    }

    async fn make_index() -> InMemoryVectorIndex {
        let index = InMemoryVectorIndex::new();
        index
            .ensure_collection(&schema(), &IndexSpec::cosine_autoindex())
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_insert_and_count() {
        let index = make_index().await;
        assert_eq!(index.count("notes").await.unwrap(), 0);

        let n = index
            .insert("notes", vec![make_record("hello", vec![1.0, 0.0, 0.0], "s")])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(index.count("notes").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent() {
        let index = make_index().await;
        index
            .insert("notes", vec![make_record("kept", vec![1.0, 0.0, 0.0], "s")])
            .await
            .unwrap();
        index
            .ensure_collection(&schema(), &IndexSpec::cosine_autoindex())
            .await
            .unwrap();
        assert_eq!(index.count("notes").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_returns_similar_first() {
        let index = make_index().await;
        index
            .insert(
                "notes",
                vec![
                    make_record("rust lang", vec![0.9, 0.1, 0.0], "s"),
                    make_record("cooking", vec![0.0, 0.0, 1.0], "s"),
                ],
            )
            .await
            .unwrap();

        let request = SearchRequest::new(vec![1.0, 0.0, 0.0], 2).with_output_fields(&["text"]);
        let hits = index.search("notes", &request).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].str_field("text"), Some("rust lang"));
        assert!(hits[0].score > hits[1].score);
        assert!(hits[0].payload.get("session_id").is_none());
    }

    #[tokio::test]
    async fn test_search_limit() {
        let index = make_index().await;
        for i in 0..10 {
            let mut v = vec![0.0f32; 3];
            v[i % 3] = 1.0;
            index
                .insert("notes", vec![make_record(&format!("entry_{i}"), v, "s")])
                .await
                .unwrap();
        }
        let hits = index
            .search("notes", &SearchRequest::new(vec![1.0, 0.0, 0.0], 3))
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_search_filter() {
        let index = make_index().await;
        index
            .insert(
                "notes",
                vec![
                    make_record("a", vec![1.0, 0.0, 0.0], "s1"),
                    make_record("b", vec![0.9, 0.1, 0.0], "s2"),
                ],
            )
            .await
            .unwrap();

        let request = SearchRequest::new(vec![1.0, 0.0, 0.0], 10)
            .with_filter(Filter::eq("session_id", "s2"))
            .with_output_fields(&["text"]);
        let hits = index.search("notes", &request).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].str_field("text"), Some("b"));
    }

    #[tokio::test]
    async fn test_equal_scores_prefer_latest_row() {
        let index = make_index().await;
        index
            .insert(
                "notes",
                vec![
                    make_record("old", vec![1.0, 0.0, 0.0], "s"),
                    make_record("new", vec![1.0, 0.0, 0.0], "s"),
                ],
            )
            .await
            .unwrap();
        let request = SearchRequest::new(vec![1.0, 0.0, 0.0], 1).with_output_fields(&["text"]);
        let hits = index.search("notes", &request).await.unwrap();
        assert_eq!(hits[0].str_field("text"), Some("new"));
    }

    #[tokio::test]
    async fn test_invalid_batch_inserts_nothing() {
        let index = make_index().await;
        let err = index
            .insert(
                "notes",
                vec![
                    make_record("ok", vec![1.0, 0.0, 0.0], "s"),
                    make_record("bad", vec![1.0, 0.0], "s"),
                ],
            )
            .await;
        assert!(err.is_err());
        assert_eq!(index.count("notes").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_collection_and_dimension_errors() {
        let index = make_index().await;
        assert!(index
            .search("absent", &SearchRequest::new(vec![1.0, 0.0, 0.0], 1))
            .await
            .is_err());
        assert!(index
            .search("notes", &SearchRequest::new(vec![1.0, 0.0], 1))
            .await
            .is_err());
        assert!(index.describe("absent").await.unwrap().is_none());
        assert_eq!(index.describe("notes").await.unwrap(), Some(schema()));
    }

    #[tokio::test]
    async fn test_unavailable_index_fails_every_call() {
        let index = make_index().await;
        index.set_available(false);
        let err = index.count("notes").await.unwrap_err();
        assert!(err.is_unavailable());
        index.set_available(true);
        assert_eq!(index.count("notes").await.unwrap(), 0);
    }
}
