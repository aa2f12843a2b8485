//! HTTP client for the evaluator API, with an offline mock mode.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::analytics::{
    keywords_from, provider_comparison_from, query_metrics_from, similarity_from,
    KeywordReport, ProviderComparison, QueryMetrics, SimilarityAnalysis, Trends,
};
use crate::config::{ClientSettings, EvaluationSettings};
use crate::error::{EvalError, Result};
use crate::mock;
use crate::server::HealthStatus;
use crate::types::{Query, QueryResults, QuerySubmission, StatusReport, SubmitResponse};

/// Configuration for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL of the service (e.g. `http://localhost:8000`).
    pub base_url: String,
    /// Serve canned data instead of calling the service.
    pub use_mock: bool,
    /// Sleep for the canned per-call latency in mock mode.
    pub simulate_latency: bool,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl ApiClientConfig {
    /// Create a config with sensible defaults.
    ///
    /// - connect_timeout: 3 s
    /// - request_timeout: 30 s
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            use_mock: false,
            simulate_latency: true,
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ApiClient {
    config: ApiClientConfig,
    http: reqwest::Client,
}

impl ApiClient {
    /// Start building a client aimed at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::builder(settings.api_url.clone())
            .mock(settings.use_mock)
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn is_mock(&self) -> bool {
        self.config.use_mock
    }

    /// WebSocket URL streaming progress for `query_id`.
    pub fn ws_url(&self, query_id: &str) -> String {
        let base = &self.config.base_url;
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.clone()
        };
        format!("{ws_base}/ws/queries/{query_id}/status")
    }

    async fn mock_pause(&self, ms: u64) {
        if self.config.simulate_latency {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Turn a non-2xx response into `EvalError::Api`, carrying the server's
    /// `detail` when the body has one.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let code = status.as_u16();
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
            .unwrap_or_else(|| format!("HTTP error! status: {code}"));
        Err(EvalError::Api {
            status: code,
            detail,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.config.base_url, path);
        debug!(url = %url, "GET");
        let result = async {
            let resp = self.http.get(&url).send().await?;
            let resp = Self::check(resp).await?;
            Ok::<T, EvalError>(resp.json::<T>().await?)
        }
        .await;
        if let Err(e) = &result {
            warn!(error = %e, url = %url, "api request failed");
        }
        result
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.config.base_url, path);
        debug!(url = %url, "POST");
        let result = async {
            let resp = self.http.post(&url).json(body).send().await?;
            let resp = Self::check(resp).await?;
            Ok::<T, EvalError>(resp.json::<T>().await?)
        }
        .await;
        if let Err(e) = &result {
            warn!(error = %e, url = %url, "api request failed");
        }
        result
    }

    /// Submit a new query.
    ///
    /// # Errors
    /// - `EvalError::Api` with the server's detail on a non-2xx reply.
    /// - `EvalError::Http` when the service cannot be reached.
    pub async fn submit_query(&self, submission: &QuerySubmission) -> Result<SubmitResponse> {
        if self.is_mock() {
            self.mock_pause(mock::SUBMIT_DELAY_MS).await;
            return Ok(mock::mock_submit_response());
        }
        self.post("/api/v1/queries/", submission).await
    }

    /// Query, responses and (once analysed) evaluation metrics.
    pub async fn query_results(&self, query_id: &str) -> Result<QueryResults> {
        if self.is_mock() {
            self.mock_pause(mock::RESULTS_DELAY_MS).await;
            let mut results = mock::mock_query_results();
            results.query.id = query_id.to_string();
            return Ok(results);
        }
        self.get(&format!("/api/v1/queries/{query_id}/responses"))
            .await
    }

    pub async fn query_status(&self, query_id: &str) -> Result<StatusReport> {
        if self.is_mock() {
            self.mock_pause(mock::STATUS_DELAY_MS).await;
            return Ok(mock::mock_status(query_id));
        }
        self.get(&format!("/api/v1/queries/{query_id}/status"))
            .await
    }

    pub async fn list_queries(&self, skip: usize, limit: usize) -> Result<Vec<Query>> {
        if self.is_mock() {
            self.mock_pause(mock::STATUS_DELAY_MS).await;
            return Ok(vec![mock::mock_query_results().query]
                .into_iter()
                .skip(skip)
                .take(limit)
                .collect());
        }
        self.get(&format!("/api/v1/queries/?skip={skip}&limit={limit}"))
            .await
    }

    /// Metrics for one query, or service-wide trends when `query_id` is
    /// `None`, as raw JSON.
    pub async fn analytics(&self, query_id: Option<&str>) -> Result<serde_json::Value> {
        if self.is_mock() {
            return match query_id {
                Some(id) => Ok(serde_json::to_value(self.query_metrics(id).await?)?),
                None => {
                    self.mock_pause(mock::ANALYTICS_DELAY_MS).await;
                    Ok(mock::mock_analytics())
                }
            };
        }
        match query_id {
            Some(id) => self.get(&format!("/api/v1/analytics/queries/{id}/metrics")).await,
            None => self.get("/api/v1/analytics/trends").await,
        }
    }

    pub async fn query_metrics(&self, query_id: &str) -> Result<QueryMetrics> {
        if self.is_mock() {
            self.mock_pause(mock::ANALYTICS_DELAY_MS).await;
            let mut results = mock::mock_query_results();
            results.query.id = query_id.to_string();
            return Ok(query_metrics_from(&results));
        }
        self.get(&format!("/api/v1/analytics/queries/{query_id}/metrics"))
            .await
    }

    pub async fn trends(&self, days: u32) -> Result<Trends> {
        if self.is_mock() {
            self.mock_pause(mock::ANALYTICS_DELAY_MS).await;
            return Ok(mock::mock_trends(days));
        }
        self.get(&format!("/api/v1/analytics/trends?days={days}"))
            .await
    }

    pub async fn similarity_analysis(&self, query_id: &str) -> Result<SimilarityAnalysis> {
        if self.is_mock() {
            self.mock_pause(mock::ANALYTICS_DELAY_MS).await;
            let mut results = mock::mock_query_results();
            results.query.id = query_id.to_string();
            return Ok(similarity_from(&results, &EvaluationSettings::default()));
        }
        self.get(&format!("/api/v1/analytics/queries/{query_id}/similarity"))
            .await
    }

    pub async fn keyword_analysis(&self, query_id: &str) -> Result<KeywordReport> {
        if self.is_mock() {
            self.mock_pause(mock::ANALYTICS_DELAY_MS).await;
            let mut results = mock::mock_query_results();
            results.query.id = query_id.to_string();
            return Ok(keywords_from(&results, &EvaluationSettings::default()));
        }
        self.get(&format!("/api/v1/analytics/queries/{query_id}/keywords"))
            .await
    }

    pub async fn provider_comparison(&self) -> Result<ProviderComparison> {
        if self.is_mock() {
            self.mock_pause(mock::ANALYTICS_DELAY_MS).await;
            return Ok(provider_comparison_from(&mock::mock_query_results().responses));
        }
        self.get("/api/v1/analytics/providers/comparison").await
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        if self.is_mock() {
            return Ok(HealthStatus {
                status: "healthy".into(),
                service: "LLM SEO Evaluator (mock)".into(),
                providers: vec!["openai".into(), "anthropic".into(), "perplexity".into()],
            });
        }
        self.get("/health").await
    }
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    config: ApiClientConfig,
}

impl ApiClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: ApiClientConfig::new(base_url),
        }
    }

    pub fn mock(mut self, use_mock: bool) -> Self {
        self.config.use_mock = use_mock;
        self
    }

    /// Skip the canned latency in mock mode.
    pub fn instant_mock(mut self) -> Self {
        self.config.simulate_latency = false;
        self
    }

    /// Override the TCP connect timeout (default 3 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Override the per-request timeout (default 30 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> ApiClient {
        let http = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()
            .unwrap_or_default();
        ApiClient {
            config: self.config,
            http,
        }
    }
}
