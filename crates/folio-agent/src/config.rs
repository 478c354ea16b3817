use folio_core::{FolioError, FolioResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat-completion provider. All speak the OpenAI chat completions API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// api.openai.com.
    #[default]
    OpenAi,
    /// openrouter.ai.
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
}

/// Chat model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider to talk to.
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name sent with every request.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Bearer token for the provider.
    #[serde(default)]
    pub api_key: String,
    /// Base URL override; the provider default otherwise.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,
    /// Completion length cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Timeout applied to every provider request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_model_id() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model_id: default_model_id(),
            api_key: String::new(),
            api_base_url: None,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ModelConfig {
    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
            }
        }
    }

    /// HTTP client shared by the chat and embedding providers.
    pub fn http_client(&self) -> FolioResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()
            .map_err(|e| FolioError::Config(format!("cannot build HTTP client: {e}")))
    }
}
