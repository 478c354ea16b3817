use async_trait::async_trait;
use folio_core::{FolioError, FolioResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Default OpenAI embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Dimension produced by [`DEFAULT_EMBEDDING_MODEL`].
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Trait for computing text embeddings (vector representations).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embedding vector for a single text.
    async fn embed(&self, text: &str) -> FolioResult<Vec<f32>>;

    /// Compute embeddings for a batch of texts.
    async fn embed_batch(&self, texts: &[&str]) -> FolioResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimension of the embedding vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Local bag-of-words embedding, deterministic and offline.
/// Needs no network access; used throughout the tests.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    /// Create a local embedder producing vectors of `dimension` floats.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> FolioResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(FolioError::Embedding("cannot embed empty text".to_string()));
        }

        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
            .collect();

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for word in &words {
            *freq.entry(word).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        if total == 0.0 {
            return Ok(vector);
        }

        // Three hash positions per word spread collisions out.
        for (word, count) in &freq {
            let tf = count / total;
            let hash1 = fnv1a(word.as_bytes()) as usize;
            let hash2 = fnv1a(&[word.as_bytes(), &[1u8]].concat()) as usize;
            let hash3 = fnv1a(&[word.as_bytes(), &[2u8]].concat()) as usize;

            vector[hash1 % self.dimension] += tf;
            vector[hash2 % self.dimension] += tf * 0.7;
            vector[hash3 % self.dimension] += tf * 0.5;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// Settings for the remote embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name sent to the embeddings endpoint.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Expected vector length; responses of another length are rejected.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Base URL override (defaults to the OpenAI API).
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimension() -> usize {
    DEFAULT_EMBEDDING_DIMENSION
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            base_url: None,
        }
    }
}

/// Embedding provider backed by an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct OpenAiEmbedding {
    http: reqwest::Client,
    api_key: String,
    config: EmbeddingConfig,
}

impl OpenAiEmbedding {
    /// Create a provider sharing the given HTTP client.
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, config: EmbeddingConfig) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com");
        format!("{}/v1/embeddings", base.trim_end_matches('/'))
    }

    async fn request(&self, input: Value) -> FolioResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.config.model,
            "input": input,
        });

        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FolioError::Embedding(format!("request failed: {e}")))?;

        let status = resp.status();
        let json: Value = resp
            .json()
            .await
            .map_err(|e| FolioError::Embedding(format!("invalid response body: {e}")))?;

        if !status.is_success() {
            let message = json["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(FolioError::Embedding(format!(
                "embeddings API returned {status}: {message}"
            )));
        }

        let mut rows: Vec<(u64, Vec<f32>)> = Vec::new();
        for (position, item) in json["data"].as_array().into_iter().flatten().enumerate() {
            let index = item["index"].as_u64().unwrap_or(position as u64);
            let vector = item["embedding"]
                .as_array()
                .ok_or_else(|| FolioError::Embedding("response item has no embedding".into()))?
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(|| FolioError::Embedding("embedding contains non-numbers".into()))?;
            if vector.len() != self.config.dimension {
                return Err(FolioError::Embedding(format!(
                    "expected {} dimensions, got {}",
                    self.config.dimension,
                    vector.len()
                )));
            }
            rows.push((index, vector));
        }
        rows.sort_by_key(|(index, _)| *index);
        Ok(rows.into_iter().map(|(_, v)| v).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> FolioResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(FolioError::Embedding("cannot embed empty text".to_string()));
        }
        self.request(Value::String(text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FolioError::Embedding("empty embeddings response".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> FolioResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(serde_json::json!(texts)).await?;
        if vectors.len() != texts.len() {
            return Err(FolioError::Embedding(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
