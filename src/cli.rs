use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{Settings, CONFIG_ENV};
use crate::error::Result;
use crate::providers::Provider;
use crate::types::QuerySubmission;

#[derive(Parser, Debug)]
#[command(name = "llm-seo-eval")]
#[command(version)]
#[command(about = "Ask several LLM providers the same SEO question and compare the answers")]
pub struct Args {
    /// TOML settings file
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Base URL of the evaluation service
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Use canned data: mock providers for `serve`, mock client otherwise
    #[arg(long, global = true)]
    pub mock: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP/WebSocket evaluation service
    Serve {
        /// Port to listen on (overrides the settings file)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Submit a prompt to several providers
    Submit {
        prompt: String,

        #[arg(long, default_value = "general")]
        category: String,

        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Comma-separated providers (openai, anthropic, perplexity, google)
        #[arg(
            long,
            value_enum,
            value_delimiter = ',',
            default_values_t = [Provider::Openai, Provider::Anthropic]
        )]
        providers: Vec<Provider>,

        /// Follow progress until the query finishes
        #[arg(long)]
        watch: bool,
    },

    /// Show the status of a query
    Status { id: String },

    /// Show responses and evaluation metrics
    Results {
        id: String,

        /// Print raw JSON instead of the summary
        #[arg(long)]
        json: bool,
    },

    /// Follow progress of a query
    Watch {
        id: String,

        /// Use the progress WebSocket instead of polling
        #[arg(long)]
        ws: bool,
    },

    /// Write a Markdown report for a query
    Report {
        id: String,

        /// Shorter response excerpts
        #[arg(long)]
        summary: bool,

        /// Output file or directory
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show trends, or metrics for one query
    Analytics {
        #[arg(long)]
        query_id: Option<String>,

        #[arg(long, default_value = "30")]
        days: u32,
    },

    /// Check that the service is up
    Health,
}

impl Args {
    /// Load settings and fold the command-line overrides into them.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        self.apply_overrides(&mut settings);
        Ok(settings)
    }

    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(url) = &self.api_url {
            settings.client.api_url = url.trim_end_matches('/').to_string();
        }
        if self.mock {
            settings.providers.use_mock = true;
            settings.client.use_mock = true;
        }
        if let Command::Serve { port: Some(port) } = &self.command {
            settings.server.port = *port;
        }
    }
}

impl Command {
    /// Submission built from `submit` arguments.
    pub fn submission(&self) -> Option<QuerySubmission> {
        match self {
            Command::Submit {
                prompt,
                category,
                tags,
                providers,
                ..
            } => Some(QuerySubmission {
                prompt: prompt.clone(),
                category: category.clone(),
                tags: tags.clone(),
                providers: providers.iter().map(|p| p.to_string()).collect(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit_defaults() {
        let args = Args::parse_from(["llm-seo-eval", "submit", "best seo tools?"]);
        let submission = args.command.submission().expect("submit");
        assert_eq!(submission.category, "general");
        assert_eq!(submission.providers, vec!["openai", "anthropic"]);
        assert!(submission.tags.is_empty());
        assert!(matches!(args.command, Command::Submit { watch: false, .. }));
    }

    #[test]
    fn test_parse_submit_full() {
        let args = Args::parse_from([
            "llm-seo-eval",
            "submit",
            "best seo tools?",
            "--category",
            "technical",
            "--tags",
            "python,audit",
            "--providers",
            "perplexity,gemini,claude",
            "--watch",
        ]);
        let submission = args.command.submission().expect("submit");
        assert_eq!(submission.tags, vec!["python", "audit"]);
        assert_eq!(submission.providers, vec!["perplexity", "google", "anthropic"]);
        assert!(matches!(args.command, Command::Submit { watch: true, .. }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["llm-seo-eval", "status", "abc", "--mock", "--api-url", "http://x:1/"]);
        assert!(args.mock);
        assert_eq!(args.command, Command::Status { id: "abc".into() });

        let mut settings = Settings::default();
        args.apply_overrides(&mut settings);
        assert_eq!(settings.client.api_url, "http://x:1");
        assert!(settings.client.use_mock);
        assert!(settings.providers.use_mock);
    }

    #[test]
    fn test_serve_port_override() {
        let args = Args::parse_from(["llm-seo-eval", "serve", "--port", "9000"]);
        let mut settings = Settings::default();
        args.apply_overrides(&mut settings);
        assert_eq!(settings.server.port, 9000);
    }

    #[test]
    fn test_parse_report_and_analytics() {
        let args = Args::parse_from(["llm-seo-eval", "report", "q1", "--summary", "--output", "out"]);
        assert_eq!(
            args.command,
            Command::Report {
                id: "q1".into(),
                summary: true,
                output: Some(PathBuf::from("out"))
            }
        );
        let args = Args::parse_from(["llm-seo-eval", "analytics"]);
        assert_eq!(
            args.command,
            Command::Analytics {
                query_id: None,
                days: 30
            }
        );
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let res = Args::try_parse_from(["llm-seo-eval", "submit", "p", "--providers", "bard"]);
        assert!(res.is_err());
    }

    #[test]
    fn test_submit_requires_prompt() {
        assert!(Args::try_parse_from(["llm-seo-eval", "submit"]).is_err());
    }
}
