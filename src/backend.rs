//! Provider invocation.
//!
//! [`LlmBackend`] is the seam between the orchestrator and the vendors. The
//! HTTP implementation speaks each vendor's non-streaming chat API, the mock
//! implementation returns canned text, and [`ResilientBackend`] wraps either
//! with a per-attempt timeout and linear retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{ProviderSettings, Settings};
use crate::error::{EvalError, Result};
use crate::providers::{
    AnthropicRequest, AnthropicResponse, ChatCompletionRequest, ChatCompletionResponse,
    ChatMessage, GeminiContent, GeminiGenerationConfig, GeminiPart, GeminiRequest,
    GeminiResponse, Provider, SEO_SYSTEM_PROMPT,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Text and usage returned by one successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u32,
    /// Vendor-specific extras such as the stop reason.
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn provider(&self) -> Provider;
    fn model(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<Completion>;
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    provider: Provider,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(provider: Provider, api_key: impl Into<String>, settings: &ProviderSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .unwrap_or_default();
        Self {
            provider,
            model: settings.model(provider),
            api_key: api_key.into(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            client,
        }
    }

    fn provider_error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Provider {
            provider: self.provider.to_string(),
            message: message.into(),
        }
    }

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(self.provider_error(format!("HTTP {status}: {body}")))
    }

    /// OpenAI and Perplexity share the chat-completions shape.
    async fn complete_chat(&self, prompt: &str) -> Result<Completion> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SEO_SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: prompt.into(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let resp = self
            .client
            .post(self.provider.endpoint(&self.model))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;
        let body: ChatCompletionResponse = self.check(resp).await?.json().await?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.provider_error("response contained no choices"))?;
        let text = choice
            .message
            .content
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| self.provider_error("empty response text"))?;
        let tokens_used = body.usage.as_ref().and_then(|u| u.total_tokens).unwrap_or(0);
        Ok(Completion {
            text,
            tokens_used,
            metadata: serde_json::json!({
                "model": self.model,
                "finish_reason": choice.finish_reason,
                "prompt_tokens": body.usage.as_ref().and_then(|u| u.prompt_tokens),
                "completion_tokens": body.usage.as_ref().and_then(|u| u.completion_tokens),
            }),
        })
    }

    async fn complete_anthropic(&self, prompt: &str) -> Result<Completion> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: prompt.into(),
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: Some(SEO_SYSTEM_PROMPT.into()),
        };
        let resp = self
            .client
            .post(self.provider.endpoint(&self.model))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;
        let body: AnthropicResponse = self.check(resp).await?.json().await?;

        let text = body
            .text()
            .ok_or_else(|| self.provider_error("empty response text"))?;
        let tokens_used = body
            .usage
            .as_ref()
            .map(|u| u.input_tokens + u.output_tokens)
            .unwrap_or(0);
        Ok(Completion {
            text,
            tokens_used,
            metadata: serde_json::json!({
                "model": self.model,
                "stop_reason": body.stop_reason,
            }),
        })
    }

    async fn complete_gemini(&self, prompt: &str) -> Result<Completion> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".into()),
                parts: vec![GeminiPart {
                    text: Some(prompt.into()),
                }],
            }],
            system_instruction: Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(SEO_SYSTEM_PROMPT.into()),
                }],
            }),
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };
        let resp = self
            .client
            .post(self.provider.endpoint(&self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let body: GeminiResponse = self.check(resp).await?.json().await?;

        let text = body
            .text()
            .ok_or_else(|| self.provider_error("response contained no candidates"))?;
        let finish_reason = body
            .candidates
            .first()
            .and_then(|c| c.finish_reason.clone());
        let tokens_used = body
            .usage_metadata
            .as_ref()
            .and_then(|u| u.total_token_count)
            .unwrap_or(0);
        Ok(Completion {
            text,
            tokens_used,
            metadata: serde_json::json!({
                "model": self.model,
                "finish_reason": finish_reason,
            }),
        })
    }
}

#[async_trait]
impl LlmBackend for HttpBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<Completion> {
        match self.provider {
            Provider::Openai | Provider::Perplexity => self.complete_chat(prompt).await,
            Provider::Anthropic => self.complete_anthropic(prompt).await,
            Provider::Google => self.complete_gemini(prompt).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Mock backend
// ---------------------------------------------------------------------------

/// Answers with templated text after an optional simulated latency.
pub struct MockBackend {
    provider: Provider,
    model: String,
    latency: Duration,
}

impl MockBackend {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            latency: Duration::ZERO,
        }
    }

    /// Sleep a random time up to `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<Completion> {
        if !self.latency.is_zero() {
            let max_ms = self.latency.as_millis().max(1) as u64;
            let ms = {
                use rand::Rng;
                rand::thread_rng().gen_range(max_ms / 2..=max_ms)
            };
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let text = crate::mock::mock_answer(self.provider, prompt);
        let tokens_used = (text.split_whitespace().count() as f64 * 1.3).round() as u32;
        Ok(Completion {
            text,
            tokens_used,
            metadata: serde_json::json!({ "model": self.model, "mock": true }),
        })
    }
}

// ---------------------------------------------------------------------------
// Retry wrapper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Limit on each single attempt.
    pub attempt_timeout: Duration,
    /// Base delay; the wait after attempt `n` (1-based) is `retry_delay * n`.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            attempt_timeout: settings.timeout(),
            retry_delay: settings.retry_delay(),
        }
    }
}

/// A successful completion plus how long the winning attempt took.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedCompletion {
    pub completion: Completion,
    pub response_time_ms: u64,
    pub attempts: u32,
}

pub struct ResilientBackend {
    inner: Box<dyn LlmBackend>,
    policy: RetryPolicy,
}

impl ResilientBackend {
    pub fn new(inner: Box<dyn LlmBackend>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn is_retryable(err: &EvalError) -> bool {
        !matches!(
            err,
            EvalError::Config(_) | EvalError::Validation(_) | EvalError::RetryExhausted { .. }
        )
    }

    /// Call the inner backend until it succeeds or the attempts run out.
    ///
    /// # Errors
    /// - `EvalError::RetryExhausted` once every attempt failed or timed out.
    /// - The inner error unchanged when it is not worth retrying.
    pub async fn invoke(&self, prompt: &str) -> Result<TimedCompletion> {
        let provider = self.inner.provider().to_string();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(self.policy.attempt_timeout, self.inner.complete(prompt))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(EvalError::Timeout {
                        provider: provider.clone(),
                        secs: self.policy.attempt_timeout.as_secs(),
                    }),
                };

            match outcome {
                Ok(completion) => {
                    let response_time_ms = started.elapsed().as_millis() as u64;
                    debug!(provider = %provider, attempt, response_time_ms, "provider answered");
                    return Ok(TimedCompletion {
                        completion,
                        response_time_ms,
                        attempts: attempt,
                    });
                }
                Err(e) if !Self::is_retryable(&e) => return Err(e),
                Err(e) => {
                    warn!(provider = %provider, attempt, error = %e, "provider attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.retry_delay * attempt).await;
            }
        }

        Err(EvalError::RetryExhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}

#[async_trait]
impl LlmBackend for ResilientBackend {
    fn provider(&self) -> Provider {
        self.inner.provider()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, prompt: &str) -> Result<Completion> {
        self.invoke(prompt).await.map(|t| t.completion)
    }
}

/// Backend registry keyed by provider.
pub type BackendMap = HashMap<Provider, Arc<ResilientBackend>>;

/// One resilient backend per provider that can be called with `settings`:
/// every provider in mock mode, otherwise those with a usable API key.
pub fn backends_from_settings(settings: &Settings) -> BackendMap {
    let policy = RetryPolicy::from_settings(&settings.providers);
    let mut map = BackendMap::new();
    for provider in settings.configured_providers() {
        let inner: Box<dyn LlmBackend> = if settings.providers.use_mock {
            Box::new(
                MockBackend::new(provider)
                    .with_model(settings.providers.model(provider))
                    .with_latency(Duration::from_millis(settings.providers.mock_latency_ms)),
            )
        } else {
            match settings.providers.api_key(provider) {
                Some(key) => Box::new(HttpBackend::new(provider, key, &settings.providers)),
                None => continue,
            }
        };
        map.insert(provider, Arc::new(ResilientBackend::new(inner, policy.clone())));
    }
    map
}
