use bytes::{Buf, BytesMut};
use futures::StreamExt;
use optimizer_core::llm::{ModelClient, ModelError, Progress};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::ollama::config::{ModelProfile, OllamaConfig};

/// Fixed wait between retry attempts after a transport timeout.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One newline-delimited record from the generate stream. Unknown fields
/// (including the server's `done` flag) are ignored; stream EOF is the
/// completion signal.
#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: Option<String>,
}

enum AttemptError {
    /// Connect or body-read timeout; retryable within the budget.
    Timeout(String),
    /// Everything else; fails the call on first occurrence.
    Fatal(ModelError),
}

pub struct OllamaClient {
    http: Client,
    cfg: OllamaConfig,
    active: ModelProfile,
}

impl OllamaClient {
    pub fn new(cfg: OllamaConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .build()?;
        let active = cfg
            .models
            .iter()
            .find(|m| m.name == cfg.default_model)
            .or_else(|| cfg.models.first())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no models configured"))?;
        Ok(OllamaClient { http, cfg, active })
    }

    pub fn active(&self) -> &ModelProfile {
        &self.active
    }

    /// One request/response cycle. The accumulator lives here so a retried
    /// attempt starts from scratch with no partial carry-over.
    async fn attempt(
        &self,
        url: &str,
        body: &GenerateRequest<'_>,
        progress: &mut dyn Progress,
    ) -> Result<String, AttemptError> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .timeout(self.active.timeout)
            .send()
            .await
            .map_err(classify)?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AttemptError::Fatal(ModelError::EndpointNotResponding));
        }
        if !status.is_success() {
            error!(target: "providers::ollama", "generate non-2xx status={status}");
            return Err(AttemptError::Fatal(ModelError::RequestFailed(format!(
                "HTTP {status}"
            ))));
        }

        let mut stream = resp.bytes_stream();
        let mut buf = BytesMut::new();
        let mut acc = String::new();
        while let Some(item) = stream.next().await {
            let b = item.map_err(classify)?;
            buf.extend_from_slice(&b);
            while let Some(pos) = twoway::find_bytes(&buf, b"\n") {
                let line = buf.split_to(pos);
                buf.advance(1);
                push_fragment(&line, &mut acc, progress);
            }
        }
        // Last record may arrive without a trailing newline.
        if !buf.is_empty() {
            push_fragment(&buf, &mut acc, progress);
        }
        Ok(acc)
    }
}

impl ModelClient for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        progress: &mut dyn Progress,
    ) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.active.base_url.trim_end_matches('/'));
        let body = GenerateRequest {
            model: &self.active.name,
            prompt,
            stream: true,
        };
        info!(target: "providers::ollama", "generate start model={} url={}", self.active.name, url);
        debug!(target: "providers::ollama", "prompt: {prompt}");

        let max_attempts = self.active.max_retries;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(&url, &body, progress).await {
                Ok(text) => {
                    info!(
                        target: "providers::ollama",
                        "generate done, {} bytes after {attempt} attempt(s)",
                        text.len()
                    );
                    return Ok(text);
                }
                Err(AttemptError::Timeout(detail)) => {
                    if attempt >= max_attempts {
                        error!(target: "providers::ollama", "timed out after {attempt} attempts: {detail}");
                        return Err(ModelError::Timeout { attempts: attempt });
                    }
                    warn!(target: "providers::ollama", "attempt {attempt} timed out, retrying: {detail}");
                    sleep(RETRY_BACKOFF).await;
                }
                Err(AttemptError::Fatal(e)) => {
                    error!(target: "providers::ollama", "generate failed: {e}");
                    return Err(e);
                }
            }
        }
    }

    fn list_models(&self) -> Vec<String> {
        self.cfg.models.iter().map(|m| m.name.clone()).collect()
    }

    fn set_model(&mut self, name: &str) -> Result<(), ModelError> {
        let profile = self
            .cfg
            .models
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))?;
        self.active = profile;
        Ok(())
    }
}

fn push_fragment(line: &[u8], acc: &mut String, progress: &mut dyn Progress) {
    if let Some(fragment) = decode_line(line) {
        acc.push_str(&fragment);
        progress.on_fragment(&fragment);
    }
}

/// Decode one record. Malformed lines are transport noise and yield nothing;
/// so do records without a non-empty `response` fragment.
fn decode_line(line: &[u8]) -> Option<String> {
    let chunk: StreamChunk = serde_json::from_slice(line).ok()?;
    chunk.response.filter(|s| !s.is_empty())
}

fn classify(e: reqwest::Error) -> AttemptError {
    if e.is_timeout() {
        AttemptError::Timeout(e.to_string())
    } else if e.is_connect() {
        AttemptError::Fatal(ModelError::Unreachable(e.to_string()))
    } else {
        AttemptError::Fatal(ModelError::RequestFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_line_extracts_response_fragment() {
        assert_eq!(
            decode_line(br#"{"model":"llama3","response":"Hi","done":false}"#),
            Some("Hi".to_string())
        );
    }

    #[test]
    fn decode_line_skips_noise_and_empty_fragments() {
        assert_eq!(decode_line(b"not json"), None);
        assert_eq!(decode_line(b""), None);
        assert_eq!(decode_line(br#"{"done":true}"#), None);
        assert_eq!(decode_line(br#"{"response":""}"#), None);
    }
}
