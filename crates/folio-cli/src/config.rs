use folio_agent::{MemoryConfig, ModelConfig};
use folio_core::{FolioError, FolioResult};
use folio_gateway::GatewayConfig;
use folio_memory::documents::{DEFAULT_DOCUMENT_COLLECTION, DEFAULT_RETRIEVAL_K};
use folio_memory::{CacheConfig, EmbeddingConfig};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Contents of `folio.toml`, with environment overrides applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FolioConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub milvus: MilvusConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: GatewayConfig,
}

/// Connection to the Milvus / Zilliz vector database.
#[derive(Debug, Clone, Deserialize)]
pub struct MilvusConfig {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Collection holding the profile documents.
    #[serde(default = "default_document_collection")]
    pub collection: String,
}

impl Default for MilvusConfig {
    fn default() -> Self {
        Self {
            uri: None,
            token: None,
            collection: default_document_collection(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Chunks retrieved per question.
    #[serde(default = "default_retrieval_k")]
    pub k: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_retrieval_k(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_document_collection() -> String {
    DEFAULT_DOCUMENT_COLLECTION.to_string()
}
fn default_retrieval_k() -> usize {
    DEFAULT_RETRIEVAL_K
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}

impl FolioConfig {
    /// Read `path` (defaults when it does not exist), then apply `.env` and
    /// process environment overrides.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(raw) => toml::from_str(&raw).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file '{}': {e}", path.display())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file; using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        };

        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "Failed to load .env");
            }
        }
        config.apply_env(|key| std::env::var(key).ok());
        config.warn_on_missing_index();
        Ok(config)
    }

    /// Override settings from environment variables looked up with `lookup`.
    /// Blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("OPENAI_API_KEY") {
            self.model.api_key = key;
        }
        if let Some(model) = var("OPENAI_LLM_MODEL") {
            self.model.model_id = model;
        }
        if let Some(model) = var("OPENAI_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(uri) = var("MILVUS_URI") {
            self.milvus.uri = Some(uri);
        }
        if let Some(token) = var("MILVUS_TOKEN") {
            self.milvus.token = Some(token);
        }
        if let Some(collection) = var("MILVUS_COLLECTION") {
            self.milvus.collection = collection;
        }
    }

    fn warn_on_missing_index(&self) {
        if self.milvus_uri().is_none() {
            warn!("MILVUS_URI is not set; cache and memory are disabled and retrieval is empty");
        } else if self.milvus.token.as_deref().map_or(true, |t| t.trim().is_empty()) {
            warn!("MILVUS_TOKEN is not set; connecting without authentication");
        }
    }

    /// Milvus endpoint, if one is configured.
    pub fn milvus_uri(&self) -> Option<&str> {
        self.milvus
            .uri
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    /// API key for the model and embedding providers.
    pub fn require_api_key(&self) -> FolioResult<&str> {
        let key = self.model.api_key.trim();
        if key.is_empty() {
            return Err(FolioError::Config(
                "OPENAI_API_KEY is not set (or [model].api_key in the config file)".to_string(),
            ));
        }
        Ok(key)
    }
}
