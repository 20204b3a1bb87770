//! HTTPS client for the optional LLM façade.
//!
//! Same retry/backoff shape as [`crate::embedding::OpenAiEmbeddingProvider`]:
//! exponential backoff with jitter, retryable-status classification, a
//! per-call deadline. Kept as its own small client rather than sharing code
//! with the embedding provider since the two talk to different endpoints
//! with different request/response shapes.

use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LocalRetrieveError, ProviderErrorKind, Result};
use crate::search::SearchResult;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const MAX_ATTEMPTS: u32 = 3;

/// Configuration for the LLM façade. Entirely separate from [`crate::Config`]
/// since the façade is an optional layer applications opt into explicitly,
/// not a core engine dependency.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    /// Chat-completion model name, e.g. `gpt-4o-mini`.
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Chat-completions endpoint URL.
    pub endpoint: String,
    /// Maximum tokens to generate per call.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-call deadline.
    pub http_timeout: Duration,
    /// Maximum backoff delay between retries.
    pub max_backoff: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_tokens: 512,
            temperature: 0.2,
            http_timeout: Duration::from_secs(30),
            max_backoff: Duration::from_secs(15),
        }
    }
}

/// A thin chat-completions client used for query enhancement and result
/// summarization.
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl LlmClient {
    /// Builds a client, reading the API key from `config.api_key_env`.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            LocalRetrieveError::provider(
                ProviderErrorKind::Auth,
                format!("environment variable {} is not set", config.api_key_env),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| LocalRetrieveError::provider(ProviderErrorKind::Network, e.to_string()))?;

        Ok(Self { client, config, api_key })
    }

    /// Sends `prompt` as a single user message and returns the model's
    /// text response. The lowest-level operation the façade exposes;
    /// `enhance_query`/`summarize_results` build prompts on top of it.
    pub async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        for attempt in 0..MAX_ATTEMPTS {
            let response = self
                .client
                .post(&self.config.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: ChatResponse = resp
                            .json()
                            .await
                            .map_err(|e| LocalRetrieveError::provider(ProviderErrorKind::Network, e.to_string()))?;
                        return parsed
                            .choices
                            .into_iter()
                            .next()
                            .map(|c| c.message.content)
                            .ok_or_else(|| {
                                LocalRetrieveError::provider(ProviderErrorKind::Network, "empty choices in llm response")
                            });
                    }

                    if !is_retryable_status(status) || attempt + 1 == MAX_ATTEMPTS {
                        let message = resp.text().await.unwrap_or_default();
                        return Err(classify_status_error(status, message));
                    }

                    let delay = backoff_delay(attempt, self.config.max_backoff);
                    warn!(attempt, status = %status, delay_ms = delay.as_millis() as u64, "retrying llm call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt + 1 == MAX_ATTEMPTS || !(e.is_timeout() || e.is_connect()) {
                        return Err(LocalRetrieveError::provider(ProviderErrorKind::Network, e.to_string()));
                    }
                    let delay = backoff_delay(attempt, self.config.max_backoff);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transport error");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(LocalRetrieveError::provider(
            ProviderErrorKind::Network,
            "exhausted retries calling llm endpoint",
        ))
    }

    /// Expands or clarifies a user query for retrieval, e.g. adding
    /// synonyms or resolving ambiguous terms.
    pub async fn enhance_query(&self, query: &str) -> Result<String> {
        let prompt = format!(
            "Rewrite this search query to include likely synonyms and related \
             terms, without changing its meaning. Reply with only the rewritten \
             query.\n\nQuery: {query}"
        );
        self.call_llm(&prompt).await
    }

    /// Produces a short natural-language summary of a result set.
    pub async fn summarize_results(&self, query: &str, results: &[SearchResult]) -> Result<String> {
        if results.is_empty() {
            return Ok("No results found.".to_string());
        }

        let mut prompt = format!("Summarize how these search results answer the query \"{query}\":\n\n");
        for (i, result) in results.iter().take(10).enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, result.snippet));
        }
        self.call_llm(&prompt).await
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
    LocalRetrieveError::provider(kind, format!("llm endpoint returned {status}: {message}"))
}

/// Exponential backoff with +/-20% jitter, capped at `max`.
fn backoff_delay(attempt: u32, max: Duration) -> Duration {
    let base = Duration::from_millis(250 * 2u64.saturating_pow(attempt));
    let capped = base.min(max);
    let jitter_frac = rand::thread_rng().gen_range(0.8..1.2);
    capped.mul_f64(jitter_frac)
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}
