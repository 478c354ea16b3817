use crate::embedding::EmbeddingProvider;
use crate::index::{CollectionSchema, FieldSchema, Payload, Record, SearchHit, SearchRequest, VectorIndex};
use folio_core::FolioResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default profile-document collection name.
pub const DEFAULT_DOCUMENT_COLLECTION: &str = "portfolio_rag";
/// Default number of chunks retrieved per question.
pub const DEFAULT_RETRIEVAL_K: usize = 6;
/// Payload field holding the chunk text.
pub const TEXT_FIELD: &str = "text";

const TEXT_MAX_BYTES: usize = 65_535;
const METADATA_MAX_BYTES: usize = 1024;

const STRING_METADATA_FIELDS: [&str; 11] = [
    "producer",
    "creator",
    "creationdate",
    "author",
    "keywords",
    "moddate",
    "subject",
    "title",
    "trapped",
    "source",
    "page_label",
];
const INT_METADATA_FIELDS: [&str; 2] = ["total_pages", "page"];

/// Fixed metadata carried by every document chunk.
///
/// Every field has a default, so a chunk built from any loader is always
/// schema-complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    /// Tool that produced the source file.
    pub producer: String,
    /// Application that created the source file.
    pub creator: String,
    /// Creation date as recorded in the source.
    pub creationdate: String,
    /// Document author.
    pub author: String,
    /// Keywords; `portfolio` for profile documents.
    pub keywords: String,
    /// Last modification date as recorded in the source.
    pub moddate: String,
    /// Document subject.
    pub subject: String,
    /// Document title.
    pub title: String,
    /// PDF trapping flag.
    pub trapped: String,
    /// Path the chunk was loaded from.
    pub source: String,
    /// Printed page label.
    pub page_label: String,
    /// Pages in the source document.
    pub total_pages: i64,
    /// Zero-based page the chunk came from.
    pub page: i64,
}

impl DocumentMetadata {
    /// Metadata for a chunk loaded from `source`, tagged as portfolio content.
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            keywords: "portfolio".to_string(),
            source: source.into(),
            ..Self::default()
        }
    }

    fn from_payload(payload: &Payload) -> Self {
        let mut fields = Payload::new();
        for name in STRING_METADATA_FIELDS.iter().chain(INT_METADATA_FIELDS.iter()) {
            if let Some(value) = payload.get(*name) {
                fields.insert((*name).to_string(), value.clone());
            }
        }
        serde_json::from_value(Value::Object(fields)).unwrap_or_default()
    }
}

/// A chunk of profile text with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Chunk text.
    pub page_content: String,
    /// Source metadata.
    pub metadata: DocumentMetadata,
}

impl DocumentChunk {
    /// Build a chunk.
    pub fn new(page_content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }

    /// Row for the document collection.
    pub fn to_record(&self, vector: Vec<f32>) -> FolioResult<Record> {
        let mut payload = match serde_json::to_value(&self.metadata)? {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        payload.insert(TEXT_FIELD.to_string(), Value::String(self.page_content.clone()));
        Ok(Record::new(vector, payload))
    }

    fn from_hit(hit: &SearchHit) -> Self {
        Self {
            page_content: hit.str_field(TEXT_FIELD).unwrap_or_default().to_string(),
            metadata: DocumentMetadata::from_payload(&hit.payload),
        }
    }
}

/// Schema of the profile-document collection.
pub fn document_schema(collection: &str, dimension: usize) -> CollectionSchema {
    let mut schema = CollectionSchema::new(collection, "Portfolio profile documents")
        .field(FieldSchema::primary_key())
        .field(FieldSchema::vector(dimension))
        .field(FieldSchema::varchar(TEXT_FIELD, TEXT_MAX_BYTES));
    for name in STRING_METADATA_FIELDS {
        schema = schema.field(FieldSchema::varchar(name, METADATA_MAX_BYTES));
    }
    for name in INT_METADATA_FIELDS {
        schema = schema.field(FieldSchema::int64(name));
    }
    schema
}

fn output_fields() -> Vec<&'static str> {
    let mut fields = vec![TEXT_FIELD];
    fields.extend(STRING_METADATA_FIELDS);
    fields.extend(INT_METADATA_FIELDS);
    fields
}

/// Top-k similarity retriever over the document collection.
pub struct DocumentRetriever {
    index: Option<Arc<dyn VectorIndex>>,
    embedder: Arc<dyn EmbeddingProvider>,
    collection: String,
    k: usize,
}

impl DocumentRetriever {
    /// Retriever over `collection`; `index` is `None` when no engine is configured.
    pub fn new(
        index: Option<Arc<dyn VectorIndex>>,
        embedder: Arc<dyn EmbeddingProvider>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            index,
            embedder,
            collection: collection.into(),
            k: DEFAULT_RETRIEVAL_K,
        }
    }

    /// Change the number of chunks returned.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether an index is configured.
    pub fn is_configured(&self) -> bool {
        self.index.is_some()
    }

    /// Up to `k` chunks most similar to `question`.
    ///
    /// A missing or failing index yields no chunks; a failing embedder is an
    /// error.
    pub async fn retrieve(&self, question: &str) -> FolioResult<Vec<DocumentChunk>> {
        let Some(index) = &self.index else {
            debug!("No vector index configured; retrieving nothing");
            return Ok(Vec::new());
        };

        let vector = self.embedder.embed(question).await?;
        let request = SearchRequest::new(vector, self.k).with_output_fields(&output_fields());

        match index.search(&self.collection, &request).await {
            Ok(hits) => {
                debug!(chunks = hits.len(), collection = %self.collection, "Retrieved documents");
                Ok(hits.iter().map(DocumentChunk::from_hit).collect())
            }
            Err(e) => {
                warn!(error = %e, collection = %self.collection, "Document search failed; continuing without context");
                Ok(Vec::new())
            }
        }
    }

    /// Schema of the document collection as stored in the index.
    pub async fn describe(&self) -> FolioResult<Option<CollectionSchema>> {
        match &self.index {
            Some(index) => index.describe(&self.collection).await,
            None => Ok(None),
        }
    }
}
