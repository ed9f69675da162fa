use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
const DEFAULT_OLLAMA_PORT: u16 = 11434;
const MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl OllamaConfig {
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            model: model.into(),
            batch_size: 32,
            max_retries: 5,
            initial_backoff_ms: 500,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f64>>,
}

enum Attempt {
    Embedded(Vec<Vec<f64>>),
    Overloaded(String),
}

pub struct OllamaClient {
    http: Client,
    endpoint: String,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            bail!("an embedding model name is required");
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build http client")?;
        let endpoint = format!("{}/api/embed", normalize_base_url(&config.host));

        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let batch_size = self.config.batch_size.max(1);
        let mut out = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
            out.extend(self.embed_batch(batch)?);
            if (batch_index + 1) % 50 == 0 {
                info!(
                    model = %self.config.model,
                    embedded = out.len(),
                    total = texts.len(),
                    "embedding progress"
                );
            }
        }

        Ok(out)
    }

    pub fn embed_one(&self, text: &str) -> Result<Vec<f64>> {
        let mut embeddings = self.embed_batch(&[text.to_string()])?;
        embeddings
            .pop()
            .context("embedding server returned no vector for the query")
    }

    fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f64>>> {
        let mut backoff_ms = self.config.initial_backoff_ms.max(1);
        let mut last_overload = String::new();

        for attempt in 0..=self.config.max_retries {
            match self.try_embed(batch)? {
                Attempt::Embedded(embeddings) => return Ok(embeddings),
                Attempt::Overloaded(reason) => {
                    last_overload = reason;
                    if attempt == self.config.max_retries {
                        break;
                    }
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms,
                        reason = %last_overload,
                        "embedding server overloaded; retrying"
                    );
                    thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                }
            }
        }

        bail!(
            "embedding server at {} stayed overloaded after {} retries ({last_overload}); \
             raise OLLAMA_NUM_PARALLEL or OLLAMA_MAX_QUEUE on the server, or lower the batch size",
            self.endpoint,
            self.config.max_retries
        )
    }

    fn try_embed(&self, batch: &[String]) -> Result<Attempt> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: batch,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .with_context(|| format!("failed to reach embedding server at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            if is_overloaded(status, &body) {
                return Ok(Attempt::Overloaded(format!("HTTP {status}")));
            }
            bail!("embedding request failed: HTTP {status}: {}", body.trim());
        }

        let parsed = response
            .json::<EmbedResponse>()
            .context("embedding server returned an unexpected response body")?;
        if parsed.embeddings.len() != batch.len() {
            bail!(
                "embedding server returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                batch.len()
            );
        }
        Ok(Attempt::Embedded(parsed.embeddings))
    }
}

pub fn is_overloaded(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    let lowered = body.to_ascii_lowercase();
    lowered.contains("server busy") || lowered.contains("maximum pending requests")
}

pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_OLLAMA_HOST.to_string();
    }
    if trimmed.contains("://") {
        return trimmed.to_string();
    }

    let (authority, path) = trimmed.split_at(trimmed.find('/').unwrap_or(trimmed.len()));
    if has_port(authority) {
        format!("http://{authority}{path}")
    } else {
        format!("http://{authority}:{DEFAULT_OLLAMA_PORT}{path}")
    }
}

fn has_port(authority: &str) -> bool {
    let host_end = authority.rfind(']').map_or(0, |index| index + 1);
    authority[host_end..]
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|byte| byte.is_ascii_digit()))
}
