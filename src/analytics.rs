//! Read-only aggregates over stored queries and responses.
//!
//! The per-query views are pure functions over a [`QueryResults`] so the
//! client's mock mode can build them from canned data; [`Analytics`] wraps
//! a store and feeds them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EvaluationSettings;
use crate::error::Result;
use crate::evaluation::{evaluate_responses, similar_pairs};
use crate::store::QueryStore;
use crate::types::{EvaluationMetrics, LlmResponse, QueryResults};

/// Per-provider slice of [`QueryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub total_responses: usize,
    pub successful_responses: usize,
    pub avg_response_time: f64,
    pub avg_tokens: f64,
    pub avg_word_count: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDetail {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub is_successful: bool,
    pub response_time_ms: u64,
    pub tokens_used: u32,
    pub word_count: usize,
    pub character_count: usize,
    pub error_message: Option<String>,
}

/// Body of `GET /api/v1/analytics/queries/{id}/metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub query_id: String,
    pub total_responses: usize,
    pub successful_responses: usize,
    pub failed_responses: usize,
    pub avg_response_time: f64,
    pub avg_tokens_used: f64,
    pub avg_word_count: f64,
    pub provider_metrics: BTreeMap<String, ProviderMetrics>,
    pub response_details: Vec<ResponseDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPair {
    pub providers: (String, String),
    pub similarity: f64,
}

/// Body of `GET /api/v1/analytics/queries/{id}/similarity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityAnalysis {
    pub query_id: String,
    pub providers: Vec<String>,
    pub similarity_matrix: Vec<Vec<f64>>,
    pub average_similarity: f64,
    pub threshold: f64,
    /// Pairs at or above `threshold`, most similar first.
    pub similar_pairs: Vec<SimilarPair>,
}

/// Body of `GET /api/v1/analytics/queries/{id}/keywords`. Each map counts
/// how many provider answers mention the entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordReport {
    pub query_id: String,
    pub keywords: BTreeMap<String, usize>,
    pub tools: BTreeMap<String, usize>,
    pub seo_terms: BTreeMap<String, usize>,
    pub total_keywords: usize,
    pub total_tools: usize,
    pub total_seo_terms: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub total_responses: usize,
    pub successful_responses: usize,
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub avg_tokens: f64,
    pub avg_word_count: f64,
    pub models: Vec<String>,
}

/// Body of `GET /api/v1/analytics/providers/comparison`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderComparison {
    pub provider_comparison: BTreeMap<String, ProviderSummary>,
    pub total_responses: usize,
}

/// Body of `GET /api/v1/analytics/trends`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trends {
    pub days: u32,
    pub total_queries: usize,
    pub total_responses: usize,
    pub queries_by_status: BTreeMap<String, usize>,
    /// How many queries in the window asked each provider.
    pub provider_distribution: BTreeMap<String, usize>,
    pub category_distribution: BTreeMap<String, usize>,
    /// Query count per `YYYY-MM-DD` within the window.
    pub daily_queries: BTreeMap<String, usize>,
}

/// Mean of the values that are present and non-zero, or 0.
fn mean_nonzero<I: Iterator<Item = f64>>(values: I) -> f64 {
    let v: Vec<f64> = values.filter(|x| *x > 0.0).collect();
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let v: Vec<f64> = values.collect();
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

fn averages(responses: &[&LlmResponse]) -> (f64, f64, f64) {
    (
        mean_nonzero(responses.iter().map(|r| r.metadata.response_time_ms as f64)),
        mean_nonzero(responses.iter().map(|r| r.metadata.tokens_used as f64)),
        mean(responses.iter().map(|r| r.word_count as f64)),
    )
}

/// Totals and averages for one query's responses. Response time and token
/// averages skip zero values, so failed calls do not drag them down.
pub fn query_metrics_from(results: &QueryResults) -> QueryMetrics {
    let all: Vec<&LlmResponse> = results.responses.iter().collect();
    let successful = all.iter().filter(|r| r.is_successful()).count();
    let (avg_response_time, avg_tokens_used, avg_word_count) = averages(&all);

    let mut by_provider: BTreeMap<String, Vec<&LlmResponse>> = BTreeMap::new();
    for r in &all {
        by_provider.entry(r.provider.clone()).or_default().push(r);
    }
    let provider_metrics = by_provider
        .into_iter()
        .map(|(provider, rs)| {
            let (avg_response_time, avg_tokens, avg_word_count) = averages(&rs);
            let m = ProviderMetrics {
                total_responses: rs.len(),
                successful_responses: rs.iter().filter(|r| r.is_successful()).count(),
                avg_response_time,
                avg_tokens,
                avg_word_count,
            };
            (provider, m)
        })
        .collect();

    let response_details = all
        .iter()
        .map(|r| ResponseDetail {
            id: r.id.clone(),
            provider: r.provider.clone(),
            model: r.model.clone(),
            is_successful: r.is_successful(),
            response_time_ms: r.metadata.response_time_ms,
            tokens_used: r.metadata.tokens_used,
            word_count: r.word_count,
            character_count: r.character_count,
            error_message: r.error_message.clone(),
        })
        .collect();

    QueryMetrics {
        query_id: results.query.id.clone(),
        total_responses: all.len(),
        successful_responses: successful,
        failed_responses: all.len() - successful,
        avg_response_time,
        avg_tokens_used,
        avg_word_count,
        provider_metrics,
        response_details,
    }
}

/// Stored metrics when analysis has run, otherwise computed on the spot.
fn metrics_of(results: &QueryResults, max_len: usize) -> EvaluationMetrics {
    match &results.evaluation_metrics {
        Some(m) => m.clone(),
        None => evaluate_responses(&results.responses, Some(&results.query.category), max_len),
    }
}

pub fn similarity_from(results: &QueryResults, settings: &EvaluationSettings) -> SimilarityAnalysis {
    let metrics = metrics_of(results, settings.max_response_length);
    let pairs = similar_pairs(&metrics, settings.similarity_threshold)
        .into_iter()
        .map(|(a, b, similarity)| SimilarPair {
            providers: (a, b),
            similarity,
        })
        .collect();
    SimilarityAnalysis {
        query_id: results.query.id.clone(),
        providers: metrics.providers,
        similarity_matrix: metrics.similarity_matrix,
        average_similarity: metrics.average_similarity,
        threshold: settings.similarity_threshold,
        similar_pairs: pairs,
    }
}

pub fn keywords_from(results: &QueryResults, settings: &EvaluationSettings) -> KeywordReport {
    let metrics = metrics_of(results, settings.max_response_length);
    let mut report = KeywordReport {
        query_id: results.query.id.clone(),
        ..Default::default()
    };
    for m in metrics.response_metrics.values() {
        for k in &m.keyword_list {
            *report.keywords.entry(k.clone()).or_insert(0) += 1;
        }
        for t in &m.tool_mentions {
            *report.tools.entry(t.clone()).or_insert(0) += 1;
        }
        for s in &m.seo_terms {
            *report.seo_terms.entry(s.clone()).or_insert(0) += 1;
        }
    }
    report.total_keywords = report.keywords.len();
    report.total_tools = report.tools.len();
    report.total_seo_terms = report.seo_terms.len();
    report
}

pub fn provider_comparison_from(responses: &[LlmResponse]) -> ProviderComparison {
    let mut by_provider: BTreeMap<String, Vec<&LlmResponse>> = BTreeMap::new();
    for r in responses {
        by_provider.entry(r.provider.clone()).or_default().push(r);
    }
    let provider_comparison = by_provider
        .into_iter()
        .map(|(provider, rs)| {
            let successful = rs.iter().filter(|r| r.is_successful()).count();
            let (avg_response_time, avg_tokens, avg_word_count) = averages(&rs);
            let mut models: Vec<String> = rs.iter().map(|r| r.model.clone()).collect();
            models.sort();
            models.dedup();
            let summary = ProviderSummary {
                total_responses: rs.len(),
                successful_responses: successful,
                success_rate: successful as f64 / rs.len() as f64,
                avg_response_time,
                avg_tokens,
                avg_word_count,
                models,
            };
            (provider, summary)
        })
        .collect();
    ProviderComparison {
        provider_comparison,
        total_responses: responses.len(),
    }
}

/// Store-backed analytics.
#[derive(Clone)]
pub struct Analytics {
    store: Arc<dyn QueryStore>,
    settings: EvaluationSettings,
}

impl Analytics {
    pub fn new(store: Arc<dyn QueryStore>, settings: EvaluationSettings) -> Self {
        Self { store, settings }
    }

    fn results(&self, id: &str) -> Result<QueryResults> {
        let query = self.store.get_query(id)?;
        let responses = self.store.list_responses(id)?;
        let evaluation_metrics = self.store.get_evaluation(id)?;
        Ok(QueryResults {
            query,
            responses,
            evaluation_metrics,
        })
    }

    pub fn query_metrics(&self, id: &str) -> Result<QueryMetrics> {
        self.results(id).map(|r| query_metrics_from(&r))
    }

    pub fn similarity_analysis(&self, id: &str) -> Result<SimilarityAnalysis> {
        self.results(id).map(|r| similarity_from(&r, &self.settings))
    }

    pub fn keyword_analysis(&self, id: &str) -> Result<KeywordReport> {
        self.results(id).map(|r| keywords_from(&r, &self.settings))
    }

    pub fn provider_comparison(&self) -> Result<ProviderComparison> {
        self.store
            .all_responses()
            .map(|rs| provider_comparison_from(&rs))
    }

    /// Store totals plus distributions over queries created in the last
    /// `days` days.
    pub fn trends(&self, days: u32) -> Result<Trends> {
        self.trends_at(days, Utc::now())
    }

    fn trends_at(&self, days: u32, now: DateTime<Utc>) -> Result<Trends> {
        // A window reaching past the calendar's start covers every query.
        let since = Duration::try_days(i64::from(days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut trends = Trends {
            days,
            total_queries: self.store.count_queries()?,
            total_responses: self.store.count_responses()?,
            queries_by_status: self.store.status_histogram()?,
            ..Default::default()
        };

        for q in self.store.list_queries(0, usize::MAX)? {
            if q.created_at < since {
                continue;
            }
            for p in &q.providers {
                *trends.provider_distribution.entry(p.clone()).or_insert(0) += 1;
            }
            *trends
                .category_distribution
                .entry(q.category.clone())
                .or_insert(0) += 1;
            *trends
                .daily_queries
                .entry(q.created_at.format("%Y-%m-%d").to_string())
                .or_insert(0) += 1;
        }
        Ok(trends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::mock_query_results;
    use crate::providers::Provider;
    use crate::store::MemoryStore;
    use crate::types::{Query, QuerySubmission, ResponseMetadata};

    fn seeded() -> (Analytics, String) {
        let store: Arc<dyn QueryStore> = Arc::new(MemoryStore::new());
        let submission = QuerySubmission {
            prompt: "How do I fix crawl errors?".into(),
            category: "Technical".into(),
            tags: vec![],
            providers: vec!["openai".into(), "google".into()],
        };
        let query = Query::new(&submission, &[Provider::Openai, Provider::Google]);
        store.create_query(&query).expect("create");
        store
            .add_response(&LlmResponse::success(
                &query.id,
                "openai",
                "gpt-4",
                "Check the sitemap and the robots file. Fix every redirect chain.".into(),
                ResponseMetadata {
                    tokens_used: 120,
                    response_time_ms: 900,
                },
            ))
            .expect("add");
        store
            .add_response(&LlmResponse::failure(
                &query.id,
                "google",
                "gemini-1.5-pro",
                "timed out".into(),
            ))
            .expect("add");
        (
            Analytics::new(store, EvaluationSettings::default()),
            query.id,
        )
    }

    #[test]
    fn test_query_metrics_skip_zero_values_in_averages() {
        let (analytics, id) = seeded();
        let m = analytics.query_metrics(&id).expect("metrics");
        assert_eq!(m.total_responses, 2);
        assert_eq!(m.successful_responses, 1);
        assert_eq!(m.failed_responses, 1);
        assert_eq!(m.avg_response_time, 900.0);
        assert_eq!(m.avg_tokens_used, 120.0);
        assert_eq!(m.provider_metrics["google"].successful_responses, 0);
        assert_eq!(m.response_details.len(), 2);
    }

    #[test]
    fn test_unknown_query_is_not_found() {
        let (analytics, _) = seeded();
        assert!(matches!(
            analytics.similarity_analysis("nope"),
            Err(crate::error::EvalError::NotFound(_))
        ));
    }

    #[test]
    fn test_provider_comparison_success_rate() {
        let (analytics, _) = seeded();
        let c = analytics.provider_comparison().expect("comparison");
        assert_eq!(c.total_responses, 2);
        assert_eq!(c.provider_comparison["openai"].success_rate, 1.0);
        assert_eq!(c.provider_comparison["google"].success_rate, 0.0);
        assert_eq!(c.provider_comparison["google"].models, vec!["gemini-1.5-pro"]);
    }

    #[test]
    fn test_trends_window() {
        let (analytics, _) = seeded();
        let now = Utc::now();
        let t = analytics.trends_at(30, now).expect("trends");
        assert_eq!(t.total_queries, 1);
        assert_eq!(t.category_distribution.get("technical"), Some(&1));
        assert_eq!(t.provider_distribution.get("google"), Some(&1));
        assert_eq!(t.daily_queries.values().sum::<usize>(), 1);

        let later = analytics
            .trends_at(1, now + Duration::days(3))
            .expect("trends");
        assert!(later.daily_queries.is_empty());
        assert_eq!(later.total_queries, 1);
    }

    #[test]
    fn test_trends_window_wider_than_calendar() {
        let (analytics, _) = seeded();
        let t = analytics.trends(u32::MAX).expect("trends");
        assert_eq!(t.days, u32::MAX);
        assert_eq!(t.daily_queries.values().sum::<usize>(), 1);
        assert_eq!(t.category_distribution.get("technical"), Some(&1));
    }

    #[test]
    fn test_similarity_and_keywords_from_mock_results() {
        let results = mock_query_results();
        let settings = EvaluationSettings {
            similarity_threshold: 0.0,
            ..Default::default()
        };
        let sim = similarity_from(&results, &settings);
        assert_eq!(sim.providers.len(), 3);
        assert_eq!(sim.similar_pairs.len(), 3);

        let kw = keywords_from(&results, &settings);
        assert_eq!(kw.total_tools, kw.tools.len());
        assert!(kw.tools.values().all(|n| (1..=3).contains(n)));
        assert!(kw.total_keywords > 0);
    }
}
