//! Wire types shared by the server, the client and the report renderer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{EvalError, Result};
use crate::providers::Provider;

/// Longest prompt the service accepts, in characters.
pub const MAX_PROMPT_CHARS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Processing,
    Analyzing,
    #[serde(alias = "completed")]
    Complete,
    #[serde(alias = "failed")]
    Error,
}

impl QueryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryStatus::Complete | QueryStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Processing => "processing",
            QueryStatus::Analyzing => "analyzing",
            QueryStatus::Complete => "complete",
            QueryStatus::Error => "error",
        }
    }

    /// Human-readable line shown next to the status.
    pub fn message(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "Query is waiting to be processed",
            QueryStatus::Processing => "Query is being processed by LLM providers",
            QueryStatus::Analyzing => "All providers complete. Analyzing responses...",
            QueryStatus::Complete => "Query processing completed successfully",
            QueryStatus::Error => "Query processing failed",
        }
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueryStatus {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(QueryStatus::Pending),
            "processing" => Ok(QueryStatus::Processing),
            "analyzing" => Ok(QueryStatus::Analyzing),
            "complete" | "completed" => Ok(QueryStatus::Complete),
            "error" | "failed" => Ok(QueryStatus::Error),
            other => Err(EvalError::validation(format!("unknown status '{other}'"))),
        }
    }
}

/// Body of `POST /api/v1/queries/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySubmission {
    pub prompt: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub providers: Vec<String>,
}

impl QuerySubmission {
    /// Check the submission and resolve its provider names.
    ///
    /// Duplicate providers collapse to one entry, first occurrence wins.
    pub fn validate(&self) -> Result<Vec<Provider>> {
        if self.prompt.trim().is_empty() {
            return Err(EvalError::validation("prompt must not be empty"));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(EvalError::validation(format!(
                "prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        if self.category.trim().is_empty() {
            return Err(EvalError::validation("category must not be empty"));
        }
        if self.providers.is_empty() {
            return Err(EvalError::validation("at least one provider is required"));
        }
        let mut resolved = Vec::with_capacity(self.providers.len());
        for name in &self.providers {
            let p = Provider::from_str_loose(name).map_err(EvalError::Validation)?;
            if !resolved.contains(&p) {
                resolved.push(p);
            }
        }
        Ok(resolved)
    }
}

/// Reply to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub query_id: String,
    pub status: QueryStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<QueryStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub prompt: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: QueryStatus,
    #[serde(default)]
    pub response_count: usize,
    #[serde(default)]
    pub successful_responses: usize,
}

impl Query {
    pub fn new(submission: &QuerySubmission, providers: &[Provider]) -> Self {
        let now = Utc::now();
        Query {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: submission.prompt.clone(),
            category: submission.category.trim().to_lowercase(),
            tags: submission.tags.clone(),
            providers: providers.iter().map(|p| p.to_string()).collect(),
            created_at: now,
            updated_at: now,
            status: QueryStatus::Pending,
            response_count: 0,
            successful_responses: 0,
        }
    }

    pub fn apply_update(&mut self, update: &QueryUpdate) -> Result<()> {
        if let Some(prompt) = &update.prompt {
            if prompt.trim().is_empty() {
                return Err(EvalError::validation("prompt must not be empty"));
            }
            self.prompt = prompt.clone();
        }
        if let Some(category) = &update.category {
            self.category = category.trim().to_lowercase();
        }
        if let Some(tags) = &update.tags {
            self.tags = tags.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub tokens_used: u32,
    #[serde(default)]
    pub response_time_ms: u64,
}

/// One provider's answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub id: String,
    #[serde(default)]
    pub query_id: String,
    pub provider: String,
    pub model: String,
    pub response_text: String,
    #[serde(default)]
    pub metadata: ResponseMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub word_count: usize,
    #[serde(default)]
    pub character_count: usize,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl LlmResponse {
    pub fn success(
        query_id: &str,
        provider: &str,
        model: &str,
        text: String,
        metadata: ResponseMetadata,
    ) -> Self {
        LlmResponse {
            id: uuid::Uuid::new_v4().to_string(),
            query_id: query_id.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            word_count: text.split_whitespace().count(),
            character_count: text.chars().count(),
            response_text: text,
            metadata,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn failure(query_id: &str, provider: &str, model: &str, error: String) -> Self {
        LlmResponse {
            id: uuid::Uuid::new_v4().to_string(),
            query_id: query_id.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            response_text: String::new(),
            metadata: ResponseMetadata::default(),
            error_message: Some(error),
            word_count: 0,
            character_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.error_message.is_none() && !self.response_text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetrics {
    pub originality_score: f64,
    pub similarity_to_others: f64,
    pub readability_score: f64,
    #[serde(default)]
    pub factuality_score: f64,
    pub keyword_count: usize,
    #[serde(default)]
    pub keyword_list: Vec<String>,
    #[serde(default)]
    pub tool_mentions: Vec<String>,
    #[serde(default)]
    pub seo_terms: Vec<String>,
    #[serde(default)]
    pub response_length: usize,
    #[serde(default)]
    pub response_complexity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossComparison {
    pub providers: (String, String),
    pub cosine_similarity: f64,
    pub jaccard_similarity: f64,
    #[serde(default)]
    pub common_keywords: Vec<String>,
    #[serde(default)]
    pub tool_overlap: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallMetrics {
    pub avg_originality: f64,
    pub avg_readability: f64,
    pub avg_factuality: f64,
    pub total_keywords: usize,
    pub total_tools: usize,
    pub total_seo_terms: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Row/column order of `similarity_matrix`.
    #[serde(default)]
    pub providers: Vec<String>,
    pub similarity_matrix: Vec<Vec<f64>>,
    #[serde(default)]
    pub average_similarity: f64,
    pub response_metrics: BTreeMap<String, ResponseMetrics>,
    #[serde(default)]
    pub cross_comparisons: Vec<CrossComparison>,
    #[serde(default)]
    pub overall: OverallMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub query: Query,
    pub responses: Vec<LlmResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_metrics: Option<EvaluationMetrics>,
}

/// Body of `GET /api/v1/queries/{id}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub id: String,
    pub status: QueryStatus,
    #[serde(default)]
    pub completed_providers: Vec<String>,
    pub total_providers: usize,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub estimated_completion: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub status: QueryStatus,
    #[serde(default)]
    pub completed_providers: Vec<String>,
    pub total_providers: usize,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub progress_percentage: u8,
}

impl ProgressUpdate {
    /// Build an update, deriving the percentage from the status and how
    /// many providers have answered.
    pub fn from_status(
        status: QueryStatus,
        completed_providers: Vec<String>,
        total_providers: usize,
        message: impl Into<String>,
    ) -> Self {
        let progress_percentage = match status {
            QueryStatus::Complete => 100,
            QueryStatus::Analyzing => 85,
            _ if total_providers == 0 => 0,
            _ => {
                let done = completed_providers.len().min(total_providers);
                ((done * 80) / total_providers) as u8
            }
        };
        ProgressUpdate {
            status,
            completed_providers,
            total_providers,
            message: message.into(),
            progress_percentage,
        }
    }
}

impl From<StatusReport> for ProgressUpdate {
    fn from(report: StatusReport) -> Self {
        ProgressUpdate::from_status(
            report.status,
            report.completed_providers,
            report.total_providers,
            report.message,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(providers: &[&str]) -> QuerySubmission {
        QuerySubmission {
            prompt: "Best Python scripts for SEO?".into(),
            category: "automation".into(),
            tags: vec!["python".into()],
            providers: providers.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_status_accepts_legacy_spellings() {
        let s: QueryStatus = serde_json::from_str("\"completed\"").expect("deser");
        assert_eq!(s, QueryStatus::Complete);
        let s: QueryStatus = serde_json::from_str("\"failed\"").expect("deser");
        assert_eq!(s, QueryStatus::Error);
        assert_eq!(serde_json::to_string(&QueryStatus::Complete).expect("ser"), "\"complete\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(QueryStatus::Complete.is_terminal());
        assert!(QueryStatus::Error.is_terminal());
        assert!(!QueryStatus::Analyzing.is_terminal());
        assert!(!QueryStatus::Pending.is_terminal());
    }

    #[test]
    fn test_validate_resolves_aliases_and_dedups() {
        let providers = submission(&["openai", "claude", "anthropic"]).validate().expect("valid");
        assert_eq!(providers, vec![Provider::Openai, Provider::Anthropic]);
    }

    #[test]
    fn test_validate_rejects_empty_prompt() {
        let mut s = submission(&["openai"]);
        s.prompt = "   ".into();
        assert!(matches!(s.validate(), Err(EvalError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_long_prompt() {
        let mut s = submission(&["openai"]);
        s.prompt = "a".repeat(MAX_PROMPT_CHARS + 1);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        assert!(submission(&["openai", "mistral"]).validate().is_err());
    }

    #[test]
    fn test_validate_requires_a_provider() {
        assert!(submission(&[]).validate().is_err());
    }

    #[test]
    fn test_query_new_is_pending() {
        let s = submission(&["openai"]);
        let q = Query::new(&s, &[Provider::Openai]);
        assert_eq!(q.status, QueryStatus::Pending);
        assert_eq!(q.providers, vec!["openai".to_string()]);
        assert_eq!(q.created_at, q.updated_at);
    }

    #[test]
    fn test_apply_update_changes_fields() {
        let s = submission(&["openai"]);
        let mut q = Query::new(&s, &[Provider::Openai]);
        q.apply_update(&QueryUpdate {
            category: Some(" Technical ".into()),
            tags: Some(vec!["a".into()]),
            ..Default::default()
        })
        .expect("update");
        assert_eq!(q.category, "technical");
        assert_eq!(q.tags, vec!["a".to_string()]);
        assert!(q.updated_at >= q.created_at);
    }

    #[test]
    fn test_llm_response_counts() {
        let r = LlmResponse::success("q", "openai", "gpt-4", "one two three".into(), Default::default());
        assert_eq!(r.word_count, 3);
        assert_eq!(r.character_count, 13);
        assert!(r.is_successful());
        let f = LlmResponse::failure("q", "openai", "gpt-4", "boom".into());
        assert!(!f.is_successful());
    }

    #[test]
    fn test_progress_percentage() {
        let u = ProgressUpdate::from_status(QueryStatus::Processing, vec!["openai".into()], 2, "");
        assert_eq!(u.progress_percentage, 40);
        let u = ProgressUpdate::from_status(QueryStatus::Analyzing, vec![], 2, "");
        assert_eq!(u.progress_percentage, 85);
        let u = ProgressUpdate::from_status(QueryStatus::Complete, vec![], 0, "");
        assert_eq!(u.progress_percentage, 100);
        let u = ProgressUpdate::from_status(QueryStatus::Pending, vec![], 0, "");
        assert_eq!(u.progress_percentage, 0);
    }

    #[test]
    fn test_results_without_metrics_omit_field() {
        let s = submission(&["openai"]);
        let results = QueryResults {
            query: Query::new(&s, &[Provider::Openai]),
            responses: vec![],
            evaluation_metrics: None,
        };
        let v = serde_json::to_value(&results).expect("ser");
        assert!(v.get("evaluation_metrics").is_none());
    }
}
