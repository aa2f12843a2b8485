pub mod analytics;
pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod evaluation;
pub mod mock;
pub mod orchestrator;
pub mod progress;
pub mod providers;
pub mod report;
pub mod server;
pub mod store;
pub mod types;
pub mod watcher;

pub use client::ApiClient;
pub use config::Settings;
pub use error::{EvalError, Result};
pub use orchestrator::QueryOrchestrator;
pub use progress::ProgressHub;
pub use providers::Provider;
pub use types::{
    EvaluationMetrics, LlmResponse, ProgressUpdate, Query, QueryResults, QueryStatus,
    QuerySubmission, StatusReport,
};
pub use watcher::{ProgressWatcher, WatchMode, WatcherConfig};
