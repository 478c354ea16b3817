//! Vector-index contract shared by every collection owner.
//!
//! A collection is a named set of rows, each holding one float vector and a
//! flat payload of scalar fields. Implementations validate rows against the
//! collection schema, so an insert that would violate it is rejected.

use async_trait::async_trait;
use folio_core::{FolioError, FolioResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Name of the auto-assigned primary key field in every collection.
pub const ID_FIELD: &str = "id";
/// Name of the vector field in every collection.
pub const VECTOR_FIELD: &str = "vector";

/// Scalar fields of a row, keyed by field name.
pub type Payload = Map<String, Value>;

/// Data type of a collection field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    /// 64-bit signed integer.
    Int64,
    /// UTF-8 string of at most `max_length` bytes.
    VarChar {
        /// Upper bound in bytes.
        max_length: usize,
    },
    /// Dense float vector of exactly `dim` elements.
    FloatVector {
        /// Vector dimension.
        dim: usize,
    },
}

/// One field of a collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Field data type.
    #[serde(flatten)]
    pub field_type: FieldType,
    /// Whether this field is the primary key.
    #[serde(default)]
    pub is_primary: bool,
    /// Whether the index assigns the primary key.
    #[serde(default)]
    pub auto_id: bool,
}

impl FieldSchema {
    /// Auto-assigned `Int64` primary key named [`ID_FIELD`].
    pub fn primary_key() -> Self {
        Self {
            name: ID_FIELD.to_string(),
            field_type: FieldType::Int64,
            is_primary: true,
            auto_id: true,
        }
    }

    /// Float vector field named [`VECTOR_FIELD`].
    pub fn vector(dim: usize) -> Self {
        Self::plain(VECTOR_FIELD, FieldType::FloatVector { dim })
    }

    /// Bounded string field.
    pub fn varchar(name: &str, max_length: usize) -> Self {
        Self::plain(name, FieldType::VarChar { max_length })
    }

    /// Integer field.
    pub fn int64(name: &str) -> Self {
        Self::plain(name, FieldType::Int64)
    }

    fn plain(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            is_primary: false,
            auto_id: false,
        }
    }
}

/// Declared shape of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// Free-form description stored with the collection.
    #[serde(default)]
    pub description: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// Start a schema with no fields.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field.
    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Declared vector dimension, if the schema has a vector field.
    pub fn dimension(&self) -> Option<usize> {
        self.fields.iter().find_map(|f| match f.field_type {
            FieldType::FloatVector { dim } => Some(dim),
            _ => None,
        })
    }

    /// Check that a row matches this schema exactly.
    ///
    /// The vector must have the declared dimension, every scalar field except
    /// the auto primary key must be present with the right type and within
    /// its length bound, and no undeclared field may appear.
    pub fn validate(&self, record: &Record) -> FolioResult<()> {
        let dim = self.dimension().ok_or_else(|| {
            FolioError::VectorIndex(format!("collection {} has no vector field", self.name))
        })?;
        if record.vector.len() != dim {
            return Err(FolioError::VectorIndex(format!(
                "vector dimension mismatch for {}: expected {dim}, got {}",
                self.name,
                record.vector.len()
            )));
        }

        for field in &self.fields {
            if field.auto_id || matches!(field.field_type, FieldType::FloatVector { .. }) {
                continue;
            }
            let value = record.payload.get(&field.name).ok_or_else(|| {
                FolioError::VectorIndex(format!("missing field {} in {}", field.name, self.name))
            })?;
            match field.field_type {
                FieldType::Int64 if value.is_i64() => {}
                FieldType::VarChar { max_length } => match value.as_str() {
                    Some(s) if s.len() <= max_length => {}
                    Some(s) => {
                        return Err(FolioError::VectorIndex(format!(
                            "field {} exceeds {max_length} bytes ({})",
                            field.name,
                            s.len()
                        )))
                    }
                    None => return Err(type_error(&field.name, "string")),
                },
                FieldType::Int64 => return Err(type_error(&field.name, "integer")),
                FieldType::FloatVector { .. } => {}
            }
        }

        if let Some(extra) = record
            .payload
            .keys()
            .find(|k| !self.fields.iter().any(|f| &f.name == *k))
        {
            return Err(FolioError::VectorIndex(format!(
                "field {extra} is not declared in {}",
                self.name
            )));
        }
        Ok(())
    }
}

fn type_error(field: &str, expected: &str) -> FolioError {
    FolioError::VectorIndex(format!("field {field} must be {expected}"))
}

/// Similarity metric of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Cosine similarity; higher is closer.
    Cosine,
}

impl Metric {
    /// Wire name of the metric.
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "COSINE",
        }
    }
}

/// Index built over the vector field of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Indexed field.
    pub field: String,
    /// Similarity metric.
    pub metric: Metric,
    /// Engine index type.
    pub index_type: String,
}

impl IndexSpec {
    /// Cosine AUTOINDEX over [`VECTOR_FIELD`].
    pub fn cosine_autoindex() -> Self {
        Self {
            field: VECTOR_FIELD.to_string(),
            metric: Metric::Cosine,
            index_type: "AUTOINDEX".to_string(),
        }
    }
}

/// A row to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Scalar fields.
    pub payload: Payload,
}

impl Record {
    /// Build a record from a vector and payload.
    pub fn new(vector: Vec<f32>, payload: Payload) -> Self {
        Self { vector, payload }
    }
}

/// Scalar predicate applied before ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `field == "value"` on a string field.
    Eq {
        /// Field name.
        field: String,
        /// Expected value.
        value: String,
    },
}

impl Filter {
    /// Equality filter on a string field.
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Render as a boolean filter expression, e.g. `session_id == "abc"`.
    pub fn to_expr(&self) -> String {
        match self {
            Filter::Eq { field, value } => {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                format!("{field} == \"{escaped}\"")
            }
        }
    }

    /// Whether a payload satisfies the predicate.
    pub fn matches(&self, payload: &Payload) -> bool {
        match self {
            Filter::Eq { field, value } => {
                payload.get(field).and_then(Value::as_str) == Some(value.as_str())
            }
        }
    }
}

/// Nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Query vector.
    pub vector: Vec<f32>,
    /// Maximum number of hits.
    pub limit: usize,
    /// Optional scalar predicate.
    pub filter: Option<Filter>,
    /// Payload fields to return; empty returns none.
    pub output_fields: Vec<String>,
}

impl SearchRequest {
    /// Query for the `limit` nearest rows.
    pub fn new(vector: Vec<f32>, limit: usize) -> Self {
        Self {
            vector,
            limit,
            filter: None,
            output_fields: Vec::new(),
        }
    }

    /// Restrict results with a filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Choose the payload fields returned with each hit.
    pub fn with_output_fields(mut self, fields: &[&str]) -> Self {
        self.output_fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Primary key.
    pub id: i64,
    /// Similarity score; higher is closer.
    pub score: f32,
    /// Requested payload fields.
    pub payload: Payload,
}

impl SearchHit {
    /// String field of the payload.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }
}

/// Storage engine for vector collections.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection and its index if absent, then make it searchable.
    async fn ensure_collection(&self, schema: &CollectionSchema, index: &IndexSpec)
        -> FolioResult<()>;

    /// Schema of an existing collection, or `None` if it does not exist.
    async fn describe(&self, collection: &str) -> FolioResult<Option<CollectionSchema>>;

    /// Nearest rows to the query vector, best first.
    async fn search(&self, collection: &str, request: &SearchRequest)
        -> FolioResult<Vec<SearchHit>>;

    /// Insert rows; returns the number inserted.
    async fn insert(&self, collection: &str, records: Vec<Record>) -> FolioResult<usize>;

    /// Number of rows in the collection.
    async fn count(&self, collection: &str) -> FolioResult<usize>;
}

/// Order hits best first and keep `limit`.
///
/// Equal scores are broken by the larger id, so the most recently inserted
/// row wins.
pub fn rank_hits(hits: &mut Vec<SearchHit>, limit: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.id.cmp(&a.id))
    });
    hits.truncate(limit);
}

/// Cosine similarity of two vectors; 0 for mismatched lengths or zero norms.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}
