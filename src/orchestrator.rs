//! # Stage: Query Orchestrator
//!
//! ## Responsibility
//! Own the lifecycle of a query: create it, fan its prompt out to every
//! requested provider concurrently, record each answer, publish progress,
//! run the evaluation and settle the final status.
//!
//! ## Status flow
//! `pending` → `processing` → `analyzing` → `complete`, or `error` when no
//! provider produced a usable answer or storage failed.
//!
//! ## Guarantees
//! - Every requested provider ends up with exactly one response record per
//!   run, successful or not; providers without a backend get a failed record
//! - A failing provider never aborts its siblings
//! - No lock is held across an `.await`

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::backend::{backends_from_settings, BackendMap, ResilientBackend};
use crate::config::{EvaluationSettings, Settings};
use crate::error::{EvalError, Result};
use crate::evaluation::evaluate_responses;
use crate::progress::ProgressHub;
use crate::providers::Provider;
use crate::store::QueryStore;
use crate::types::{
    LlmResponse, ProgressUpdate, Query, QueryResults, QueryStatus, QuerySubmission, QueryUpdate,
    ResponseMetadata, StatusReport, SubmitResponse,
};

/// Cloning is cheap; clones share store, hub and backends.
#[derive(Clone)]
pub struct QueryOrchestrator {
    store: Arc<dyn QueryStore>,
    hub: ProgressHub,
    backends: Arc<BackendMap>,
    evaluation: EvaluationSettings,
}

impl QueryOrchestrator {
    /// Build an orchestrator with one backend per provider `settings` can
    /// reach.
    pub fn new(settings: &Settings, store: Arc<dyn QueryStore>, hub: ProgressHub) -> Self {
        Self::with_backends(
            store,
            hub,
            backends_from_settings(settings),
            settings.evaluation.clone(),
        )
    }

    pub fn with_backends(
        store: Arc<dyn QueryStore>,
        hub: ProgressHub,
        backends: BackendMap,
        evaluation: EvaluationSettings,
    ) -> Self {
        Self {
            store,
            hub,
            backends: Arc::new(backends),
            evaluation,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueryStore> {
        &self.store
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.hub
    }

    pub fn evaluation_settings(&self) -> &EvaluationSettings {
        &self.evaluation
    }

    /// Providers with a registered backend, in canonical order.
    pub fn available_providers(&self) -> Vec<Provider> {
        let mut v: Vec<Provider> = self.backends.keys().copied().collect();
        v.sort();
        v
    }

    /// Validate and store a new `pending` query.
    pub fn create_query(&self, submission: &QuerySubmission) -> Result<Query> {
        let providers = submission.validate()?;
        let query = Query::new(submission, &providers);
        self.store.create_query(&query)?;
        info!(query_id = %query.id, providers = ?query.providers, "query created");
        Ok(query)
    }

    /// Create a query and start processing it in the background.
    pub fn submit(&self, submission: &QuerySubmission) -> Result<SubmitResponse> {
        let query = self.create_query(submission)?;
        self.spawn_processing(query.id.clone());
        Ok(SubmitResponse {
            query_id: query.id,
            status: query.status,
        })
    }

    pub fn get_query(&self, id: &str) -> Result<Query> {
        self.store.get_query(id)
    }

    pub fn list_queries(&self, skip: usize, limit: usize) -> Result<Vec<Query>> {
        self.store.list_queries(skip, limit)
    }

    pub fn update_query(&self, id: &str, update: &QueryUpdate) -> Result<Query> {
        let mut query = self.store.get_query(id)?;
        query.apply_update(update)?;
        self.store.update_query(&query)?;
        Ok(query)
    }

    /// Run `process_query` on the runtime. Failures are logged.
    pub fn spawn_processing(&self, id: String) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.process_query(&id).await {
                error!(query_id = %id, error = %e, "query processing failed");
            }
        })
    }

    /// Reset a finished query to `pending` and process it again with its
    /// own provider list.
    ///
    /// # Errors
    /// - `EvalError::NotFound` for an unknown id.
    /// - `EvalError::Conflict` unless the query is `complete` or `error`;
    ///   a query that is pending or in flight already has a run coming.
    pub fn retry_query(&self, id: &str) -> Result<Query> {
        let query = self.store.transition(
            id,
            &[QueryStatus::Complete, QueryStatus::Error],
            QueryStatus::Pending,
        )?;
        self.store.clear_evaluation(id)?;
        self.hub.reset(id);
        info!(query_id = %id, "query retry started");
        self.spawn_processing(id.to_string());
        Ok(query)
    }

    /// Process one query to completion and return its final status.
    ///
    /// Storage failures mark the query `error` before being returned. A query
    /// that is not `pending` is left alone with `EvalError::Conflict`, since
    /// another run owns it.
    pub async fn process_query(&self, id: &str) -> Result<QueryStatus> {
        match self.run(id).await {
            Ok(status) => Ok(status),
            Err(e) => {
                if !matches!(e, EvalError::NotFound(_) | EvalError::Conflict(_)) {
                    if let Ok(q) = self.store.set_status(id, QueryStatus::Error) {
                        self.publish(
                            id,
                            QueryStatus::Error,
                            Vec::new(),
                            q.providers.len(),
                            QueryStatus::Error.message(),
                        );
                    }
                }
                Err(e)
            }
        }
    }

    async fn run(&self, id: &str) -> Result<QueryStatus> {
        let query = self.store.get_query(id)?;
        let providers: Vec<Provider> = query
            .providers
            .iter()
            .filter_map(|p| Provider::from_str_loose(p).ok())
            .collect();
        let total = providers.len();

        self.store
            .transition(id, &[QueryStatus::Pending], QueryStatus::Processing)?;
        self.store.clear_evaluation(id)?;
        self.publish(id, QueryStatus::Processing, Vec::new(), total, "Starting LLM queries...");

        let mut finished: Vec<String> = Vec::with_capacity(total);
        let mut successes = 0usize;
        let mut tasks = JoinSet::new();
        // Spawned providers that have not yet handed back a response.
        let mut outstanding: Vec<(Provider, String)> = Vec::new();

        for provider in providers {
            match self.backends.get(&provider) {
                Some(backend) => {
                    use crate::backend::LlmBackend;

                    outstanding.push((provider, backend.model().to_string()));
                    let backend = Arc::clone(backend);
                    let prompt = query.prompt.clone();
                    let query_id = id.to_string();
                    tasks.spawn(async move {
                        (provider, call_provider(&backend, &query_id, &prompt).await)
                    });
                }
                None => {
                    warn!(query_id = %id, provider = %provider, "provider not configured");
                    let response = LlmResponse::failure(
                        id,
                        &provider.to_string(),
                        provider.default_model(),
                        format!("{} is not configured (missing API key)", provider.display_name()),
                    );
                    self.record(response, &mut finished, &mut successes, total)?;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((provider, response)) => {
                    outstanding.retain(|(p, _)| *p != provider);
                    self.record(response, &mut finished, &mut successes, total)?;
                }
                Err(e) => error!(query_id = %id, error = %e, "provider task aborted"),
            }
        }

        // A task that panicked or was cancelled still owes its provider a record.
        for (provider, model) in outstanding {
            let response = LlmResponse::failure(
                id,
                &provider.to_string(),
                &model,
                format!("{} task aborted before answering", provider.display_name()),
            );
            self.record(response, &mut finished, &mut successes, total)?;
        }

        if successes == 0 {
            self.store.set_status(id, QueryStatus::Error)?;
            self.publish(id, QueryStatus::Error, finished, total, "Query processing failed");
            warn!(query_id = %id, "no provider produced a usable answer");
            return Ok(QueryStatus::Error);
        }

        self.store.set_status(id, QueryStatus::Analyzing)?;
        self.publish(
            id,
            QueryStatus::Analyzing,
            finished.clone(),
            total,
            QueryStatus::Analyzing.message(),
        );

        let responses = self.store.list_responses(id)?;
        let metrics = evaluate_responses(
            &responses,
            Some(&query.category),
            self.evaluation.max_response_length,
        );
        self.store.put_evaluation(id, &metrics)?;

        self.store.set_status(id, QueryStatus::Complete)?;
        self.publish(id, QueryStatus::Complete, finished, total, "Analysis complete! Results ready.");
        info!(
            query_id = %id,
            successes,
            total,
            average_similarity = metrics.average_similarity,
            "query complete"
        );
        Ok(QueryStatus::Complete)
    }

    fn record(
        &self,
        response: LlmResponse,
        finished: &mut Vec<String>,
        successes: &mut usize,
        total: usize,
    ) -> Result<()> {
        self.store.add_response(&response)?;
        let ok = response.is_successful();
        if ok {
            *successes += 1;
        }
        finished.push(response.provider.clone());

        let name = Provider::from_str_loose(&response.provider)
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|_| response.provider.clone());
        let verb = if ok { "completed" } else { "failed" };
        let message = format!("{name} {verb} ({}/{total} providers)", finished.len());
        self.publish(&response.query_id, QueryStatus::Processing, finished.clone(), total, message);
        Ok(())
    }

    fn publish(
        &self,
        id: &str,
        status: QueryStatus,
        completed: Vec<String>,
        total: usize,
        message: impl Into<String>,
    ) {
        self.hub
            .publish(id, ProgressUpdate::from_status(status, completed, total, message));
    }

    /// Current status with the providers that answered successfully.
    pub fn query_status(&self, id: &str) -> Result<StatusReport> {
        let query = self.store.get_query(id)?;
        let responses = self.store.list_responses(id)?;
        let mut completed: Vec<String> = Vec::new();
        for r in responses.iter().filter(|r| r.is_successful()) {
            if !completed.contains(&r.provider) {
                completed.push(r.provider.clone());
            }
        }
        let estimated_completion = if query.status.is_terminal() {
            None
        } else {
            let expected = self.expected_duration();
            chrono::Duration::from_std(expected)
                .ok()
                .and_then(|d| query.updated_at.checked_add_signed(d))
        };
        Ok(StatusReport {
            id: query.id,
            status: query.status,
            completed_providers: completed,
            total_providers: query.providers.len(),
            message: query.status.message().to_string(),
            estimated_completion,
        })
    }

    /// Latest progress for `id`: the live snapshot if one exists, else one
    /// derived from the stored status.
    pub fn progress(&self, id: &str) -> Result<ProgressUpdate> {
        match self.hub.snapshot(id) {
            Some(update) => Ok(update),
            None => self.query_status(id).map(ProgressUpdate::from),
        }
    }

    pub fn query_results(&self, id: &str) -> Result<QueryResults> {
        let query = self.store.get_query(id)?;
        let responses = self.store.list_responses(id)?;
        let evaluation_metrics = self.store.get_evaluation(id)?;
        Ok(QueryResults {
            query,
            responses,
            evaluation_metrics,
        })
    }

    /// Worst case for one provider: every attempt runs into its timeout.
    fn expected_duration(&self) -> Duration {
        self.backends
            .values()
            .map(|b| b.policy().attempt_timeout)
            .max()
            .unwrap_or(Duration::from_secs(30))
    }
}

async fn call_provider(backend: &ResilientBackend, query_id: &str, prompt: &str) -> LlmResponse {
    use crate::backend::LlmBackend;

    let provider = backend.provider().to_string();
    match backend.invoke(prompt).await {
        Ok(timed) => {
            info!(
                query_id = %query_id,
                provider = %provider,
                attempts = timed.attempts,
                response_time_ms = timed.response_time_ms,
                "provider answered"
            );
            let mut response = LlmResponse::success(
                query_id,
                &provider,
                backend.model(),
                timed.completion.text,
                ResponseMetadata {
                    tokens_used: timed.completion.tokens_used,
                    response_time_ms: timed.response_time_ms,
                },
            );
            if response.response_text.trim().is_empty() {
                response.error_message = Some("empty response text".into());
            }
            response
        }
        Err(e) => {
            warn!(query_id = %query_id, provider = %provider, error = %e, "provider failed");
            LlmResponse::failure(query_id, &provider, backend.model(), e.to_string())
        }
    }
}
