//! OpenAI-compatible HTTPS embedding provider.
//!
//! Talks to the `/embeddings` endpoint over `reqwest` with a token-bucket
//! rate limiter and exponential backoff with jitter. Only present behind
//! the `openai` feature so the default build carries no HTTP client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{EmbeddingProvider as EmbeddingProviderConfig, ProviderConfig};
use crate::error::{LocalRetrieveError, ProviderErrorKind, Result};
use crate::types::Embedding;

use super::EmbeddingProvider;

const ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const MAX_ATTEMPTS: u32 = 5;

/// A simple token-bucket limiter: `capacity` tokens refill continuously at
/// `capacity` per minute. Callers await `acquire()` before every request.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        Self { capacity, tokens: capacity, last_refill: Instant::now() }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * (self.capacity / 60.0)).min(self.capacity);
        self.last_refill = Instant::now();
    }

    /// Returns how long the caller must wait before a token is available.
    fn try_acquire(&mut self) -> Option<Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / (self.capacity / 60.0)))
        }
    }
}

pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
    dimension: u16,
    max_batch_size: usize,
    max_text_length: usize,
    max_backoff: Duration,
    bucket: Mutex<TokenBucket>,
    calls: AtomicU64,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        dimension: u16,
        provider_config: &EmbeddingProviderConfig,
        config: &ProviderConfig,
    ) -> Result<Self> {
        let (model, api_key_env) = match provider_config {
            EmbeddingProviderConfig::OpenAi { model, api_key_env } => (model.clone(), api_key_env.clone()),
            _ => {
                return Err(LocalRetrieveError::config(
                    "OpenAiEmbeddingProvider requires EmbeddingProvider::OpenAi configuration",
                ))
            }
        };

        let api_key = std::env::var(&api_key_env).map_err(|_| {
            LocalRetrieveError::provider(
                ProviderErrorKind::Auth,
                format!("environment variable {api_key_env} is not set"),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| LocalRetrieveError::provider(ProviderErrorKind::Network, e.to_string()))?;

        Ok(Self {
            client,
            model,
            api_key,
            dimension,
            max_batch_size: config.max_batch_size,
            max_text_length: config.max_text_length,
            max_backoff: config.max_backoff,
            bucket: Mutex::new(TokenBucket::new(config.requests_per_minute)),
            calls: AtomicU64::new(0),
        })
    }

    async fn wait_for_slot(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                bucket.try_acquire()
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    async fn request_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let body = EmbeddingsRequest { model: &self.model, input: texts };

        for attempt in 0..MAX_ATTEMPTS {
            self.wait_for_slot().await;

            let response = self
                .client
                .post(ENDPOINT)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        self.calls.fetch_add(1, Ordering::Relaxed);
                        let parsed: EmbeddingsResponse = resp
                            .json()
                            .await
                            .map_err(|e| LocalRetrieveError::provider(ProviderErrorKind::Network, e.to_string()))?;
                        let mut out: Vec<(usize, Embedding)> =
                            parsed.data.into_iter().map(|d| (d.index, d.embedding)).collect();
                        out.sort_by_key(|(idx, _)| *idx);
                        return Ok(out.into_iter().map(|(_, v)| v).collect());
                    }

                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs);

                    if !is_retryable_status(status) || attempt + 1 == MAX_ATTEMPTS {
                        let message = resp.text().await.unwrap_or_default();
                        return Err(classify_status_error(status, message));
                    }

                    let delay = retry_after.unwrap_or_else(|| backoff_delay(attempt, self.max_backoff));
                    warn!(attempt, status = %status, delay_ms = delay.as_millis() as u64, "retrying openai embeddings call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt + 1 == MAX_ATTEMPTS || !(e.is_timeout() || e.is_connect()) {
                        return Err(LocalRetrieveError::provider(ProviderErrorKind::Network, e.to_string()));
                    }
                    let delay = backoff_delay(attempt, self.max_backoff);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transport error");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(LocalRetrieveError::provider(
            ProviderErrorKind::Network,
            "exhausted retries calling openai embeddings",
        ))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn classify_status_error(status: StatusCode, message: String) -> LocalRetrieveError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Auth,
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimit,
        s if s == StatusCode::PAYMENT_REQUIRED => ProviderErrorKind::Quota,
        s if s.is_client_error() => ProviderErrorKind::Validation,
        _ => ProviderErrorKind::Network,
    };
    LocalRetrieveError::provider(kind, format!("openai returned {status}: {message}"))
}

/// Exponential backoff with +/-20% jitter, capped at `max`.
fn backoff_delay(attempt: u32, max: Duration) -> Duration {
    let base = Duration::from_millis(250 * 2u64.saturating_pow(attempt));
    let capped = base.min(max);
    let jitter_frac = rand::thread_rng().gen_range(0.8..1.2);
    capped.mul_f64(jitter_frac)
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Deserialize)]
struct EmbeddingsDatum {
    embedding: Embedding,
    index: usize,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn tag(&self) -> &str {
        "openai"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_batch(&[text]).await?.remove(0))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            if text.len() > self.max_text_length {
                return Err(LocalRetrieveError::provider(
                    ProviderErrorKind::Validation,
                    format!("text length {} exceeds max_text_length {}", text.len(), self.max_text_length),
                ));
            }
        }

        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch_size) {
            out.extend(self.request_batch(chunk).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> u16 {
        self.dimension
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn max_text_length(&self) -> usize {
        self.max_text_length
    }

    fn metrics(&self) -> super::ProviderMetrics {
        super::ProviderMetrics { requests: self.calls.load(Ordering::Relaxed), failures: 0 }
    }
}
