use super::LlmBackend;
use crate::config::{LlmProvider, ModelConfig};
use crate::stream::StreamEvent;
use async_trait::async_trait;
use folio_core::{FolioError, FolioResult};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// OpenAI-compatible API backend.
///
/// Works with OpenAI, OpenRouter, Groq and any other provider that
/// implements the OpenAI chat completions API.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Backend sending requests through `http`.
    pub fn new(config: ModelConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn build_body(&self, prompt: &str, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        body
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let request = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");

        // OpenRouter asks clients to identify themselves.
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request
                .header("HTTP-Referer", "https://github.com/fboiero/folio")
                .header("X-Title", "Folio")
        } else {
            request
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, prompt: &str) -> FolioResult<String> {
        let resp = self
            .request()
            .json(&self.build_body(prompt, false))
            .send()
            .await
            .map_err(|e| FolioError::Llm(format!("request failed: {e}")))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FolioError::Llm(format!("invalid response body: {e}")))?;

        if !status.is_success() {
            return Err(FolioError::Llm(format!(
                "chat API error {status}: {resp_body}"
            )));
        }

        parse_completion(&resp_body)
    }

    async fn complete_stream(
        &self,
        prompt: &str,
    ) -> FolioResult<(mpsc::Receiver<StreamEvent>, JoinHandle<FolioResult<String>>)> {
        let resp = self
            .request()
            .json(&self.build_body(prompt, true))
            .send()
            .await
            .map_err(|e| FolioError::Llm(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(FolioError::Llm(format!(
                "chat API error {status}: {error_body}"
            )));
        }

        let (tx, rx) = mpsc::channel::<StreamEvent>(256);
        let mut stream = resp.bytes_stream();

        let handle = tokio::spawn(async move {
            let mut lines = LineBuffer::default();
            let mut full_text = String::new();

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let message = format!("stream read error: {e}");
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: message.clone(),
                            })
                            .await;
                        return Err(FolioError::Llm(message));
                    }
                };

                for line in lines.push(&chunk) {
                    match parse_sse_line(&line) {
                        SseLine::Skip => {}
                        SseLine::Done => {
                            let _ = tx.send(StreamEvent::Done).await;
                            return Ok(full_text);
                        }
                        SseLine::Text(content) => {
                            full_text.push_str(&content);
                            if tx.send(StreamEvent::TextDelta { text: content }).await.is_err() {
                                return Err(FolioError::Llm("stream consumer went away".into()));
                            }
                        }
                    }
                }
            }

            let _ = tx.send(StreamEvent::Done).await;
            Ok(full_text)
        });

        Ok((rx, handle))
    }
}

/// Accumulates raw bytes and hands out complete lines. A line is decoded
/// only after its newline has arrived.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8(raw)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
            lines.push(line.trim().to_string());
        }
        lines
    }
}

enum SseLine {
    Skip,
    Done,
    Text(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return SseLine::Skip;
    };
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let event: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return SseLine::Skip,
    };
    match event["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseLine::Text(content.to_string()),
        _ => SseLine::Skip,
    }
}

/// Text of the first choice in a chat completion response.
pub fn parse_completion(body: &serde_json::Value) -> FolioResult<String> {
    let choice = body["choices"]
        .get(0)
        .ok_or_else(|| FolioError::Llm(format!("response has no choices: {body}")))?;
    Ok(choice["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string())
}
