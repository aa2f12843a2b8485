//! Client-side summary of one query's results, as shown in the CLI and the
//! report header.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::types::{LlmResponse, QueryResults};

/// Coarse band a `[0, 1]` score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBand {
    High,
    Medium,
    Low,
}

impl ScoreBand {
    pub fn of(score: f64) -> Self {
        if score >= 0.8 {
            ScoreBand::High
        } else if score >= 0.6 {
            ScoreBand::Medium
        } else {
            ScoreBand::Low
        }
    }
}

/// `950ms`, `1.5s`.
pub fn format_duration_ms(ms: f64) -> String {
    if ms > 1000.0 {
        format!("{:.1}s", ms / 1000.0)
    } else {
        format!("{}ms", ms.round() as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRow {
    pub provider: String,
    pub model: String,
    pub originality: f64,
    pub readability: f64,
    pub factuality: f64,
    pub similarity_to_others: f64,
    /// `1 - similarity_to_others`.
    pub uniqueness: f64,
    pub keyword_count: usize,
    pub word_count: usize,
    pub tokens_used: u32,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub response_count: usize,
    pub successful_count: usize,
    pub failed_providers: Vec<String>,
    pub avg_originality: f64,
    pub avg_readability: f64,
    pub avg_similarity: f64,
    /// Off-diagonal extremes; `None` with fewer than two analysed answers.
    pub min_similarity: Option<f64>,
    pub max_similarity: Option<f64>,
    pub unique_tools: usize,
    /// In similarity-matrix order.
    pub providers: Vec<ProviderRow>,
    pub most_original: Option<String>,
    pub most_readable: Option<String>,
    pub total_tokens: u64,
    pub avg_response_time_ms: f64,
}

impl DashboardSummary {
    pub fn from_results(results: &QueryResults) -> Self {
        let metrics = results.evaluation_metrics.clone().unwrap_or_default();
        let successful: Vec<&LlmResponse> =
            results.responses.iter().filter(|r| r.is_successful()).collect();

        let mut failed_providers: Vec<String> = Vec::new();
        for r in results.responses.iter().filter(|r| !r.is_successful()) {
            let answered = successful.iter().any(|s| s.provider == r.provider);
            if !answered && !failed_providers.contains(&r.provider) {
                failed_providers.push(r.provider.clone());
            }
        }

        let providers: Vec<ProviderRow> = metrics
            .providers
            .iter()
            .filter_map(|p| {
                let m = metrics.response_metrics.get(p)?;
                let latest = successful
                    .iter()
                    .filter(|r| &r.provider == p)
                    .max_by_key(|r| r.created_at);
                Some(ProviderRow {
                    provider: p.clone(),
                    model: latest.map(|r| r.model.clone()).unwrap_or_default(),
                    originality: m.originality_score,
                    readability: m.readability_score,
                    factuality: m.factuality_score,
                    similarity_to_others: m.similarity_to_others,
                    uniqueness: 1.0 - m.similarity_to_others,
                    keyword_count: m.keyword_count,
                    word_count: latest.map(|r| r.word_count).unwrap_or(0),
                    tokens_used: latest.map(|r| r.metadata.tokens_used).unwrap_or(0),
                    response_time_ms: latest.map(|r| r.metadata.response_time_ms).unwrap_or(0),
                })
            })
            .collect();

        let n = metrics.response_metrics.len();
        let (avg_originality, avg_readability) = if n == 0 {
            (0.0, 0.0)
        } else {
            let values = metrics.response_metrics.values();
            let (o, r) = values.fold((0.0, 0.0), |(o, r), m| {
                (o + m.originality_score, r + m.readability_score)
            });
            (o / n as f64, r / n as f64)
        };

        let off_diagonal: Vec<f64> = metrics
            .similarity_matrix
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .filter(move |(j, _)| *j != i)
                    .map(|(_, v)| *v)
            })
            .collect();
        let min_similarity = off_diagonal.iter().copied().reduce(f64::min);
        let max_similarity = off_diagonal.iter().copied().reduce(f64::max);

        let tools: BTreeSet<&str> = metrics
            .response_metrics
            .values()
            .flat_map(|m| m.tool_mentions.iter().map(String::as_str))
            .collect();

        let most_original = providers
            .iter()
            .max_by(|a, b| a.originality.total_cmp(&b.originality))
            .map(|r| r.provider.clone());
        let most_readable = providers
            .iter()
            .max_by(|a, b| a.readability.total_cmp(&b.readability))
            .map(|r| r.provider.clone());

        let total_tokens = successful
            .iter()
            .map(|r| u64::from(r.metadata.tokens_used))
            .sum();
        let avg_response_time_ms = if successful.is_empty() {
            0.0
        } else {
            successful
                .iter()
                .map(|r| r.metadata.response_time_ms as f64)
                .sum::<f64>()
                / successful.len() as f64
        };

        DashboardSummary {
            response_count: results.responses.len(),
            successful_count: successful.len(),
            failed_providers,
            avg_originality,
            avg_readability,
            avg_similarity: if off_diagonal.is_empty() {
                0.0
            } else {
                metrics.average_similarity
            },
            min_similarity,
            max_similarity,
            unique_tools: tools.len(),
            providers,
            most_original,
            most_readable,
            total_tokens,
            avg_response_time_ms,
        }
    }

    /// Providers ordered by uniqueness, most distinctive first.
    pub fn uniqueness_ranking(&self) -> Vec<(&str, f64)> {
        let mut ranking: Vec<(&str, f64)> = self
            .providers
            .iter()
            .map(|r| (r.provider.as_str(), r.uniqueness))
            .collect();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranking
    }
}
