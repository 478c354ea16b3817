use thiserror::Error;

/// A convenience `Result` alias using [`FolioError`].
pub type FolioResult<T> = Result<T, FolioError>;

/// Top-level error type for Folio.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum FolioError {
    /// The embedding provider failed or returned an unusable vector.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The vector index rejected a request or could not be reached.
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// The language model call failed.
    #[error("LLM error: {0}")]
    Llm(String),

    /// An outbound HTTP request failed at the transport level.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The retrieval-generation pipeline failed.
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Document ingestion failed.
    #[error("Ingest error: {0}")]
    Ingest(String),

    /// Configuration is missing or invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// Caller input was rejected.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FolioError {
    /// Whether the error means a backing service could not be reached, as
    /// opposed to the service answering with a rejection.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, FolioError::Http(_))
    }
}
