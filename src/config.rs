//! Runtime settings.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables. Every field has a default so an empty file (or no
//! file at all) yields a working mock-free configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EvalError, Result};
use crate::providers::Provider;

/// Environment variable naming the settings file when `--config` is absent.
pub const CONFIG_ENV: &str = "LLM_SEO_EVAL_CONFIG";
pub const API_URL_ENV: &str = "LLM_SEO_EVAL_API_URL";
pub const USE_MOCK_ENV: &str = "LLM_SEO_EVAL_USE_MOCK";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub providers: ProviderSettings,
    pub evaluation: EvaluationSettings,
    pub storage: StorageSettings,
    pub client: ClientSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Value of `Access-Control-Allow-Origin` on every response.
    pub allowed_origin: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            allowed_origin: "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// API keys by provider name. Placeholder values are treated as unset.
    pub api_keys: BTreeMap<String, String>,
    /// Model overrides by provider name.
    pub models: BTreeMap<String, String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Answer every provider with canned text instead of calling out.
    pub use_mock: bool,
    /// Simulated latency of mock backends.
    pub mock_latency_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_keys: BTreeMap::new(),
            models: BTreeMap::new(),
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_tokens: 2000,
            temperature: 0.7,
            use_mock: false,
            mock_latency_ms: 0,
        }
    }
}

impl ProviderSettings {
    /// Usable API key for `provider`, if one is configured.
    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        lookup(&self.api_keys, provider).filter(|k| !is_placeholder_key(k))
    }

    pub fn model(&self, provider: Provider) -> String {
        lookup(&self.models, provider)
            .map(str::to_string)
            .unwrap_or_else(|| provider.default_model().to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    pub similarity_threshold: f64,
    /// Responses longer than this many characters are cut before analysis.
    pub max_response_length: usize,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            max_response_length: 4000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database file. In-memory storage when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub api_url: String,
    pub use_mock: bool,
    pub poll_interval_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            use_mock: false,
            poll_interval_ms: 2000,
        }
    }
}

impl ClientSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Find the entry for `provider`, accepting alias keys such as `claude`.
fn lookup(map: &BTreeMap<String, String>, provider: Provider) -> Option<&str> {
    map.iter()
        .find(|(name, _)| Provider::from_str_loose(name).ok() == Some(provider))
        .map(|(_, v)| v.as_str())
}

/// `true` for empty keys and the `your_*_api_key_here` template values.
pub fn is_placeholder_key(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || (key.starts_with("your_") && key.ends_with("_here"))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| EvalError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EvalError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Load settings the way the binary does: explicit path, else the
    /// `LLM_SEO_EVAL_CONFIG` file, else defaults; then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut settings = match path.map(Path::to_path_buf).or(env_path) {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Apply overrides from a variable lookup. Taking the lookup as a
    /// closure keeps tests off the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for provider in Provider::ALL {
            if let Some(key) = lookup(provider.api_key_env()) {
                if !is_placeholder_key(&key) {
                    self.providers
                        .api_keys
                        .retain(|name, _| Provider::from_str_loose(name).ok() != Some(provider));
                    self.providers.api_keys.insert(provider.to_string(), key);
                }
            }
        }
        if let Some(url) = lookup(API_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.client.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(flag) = lookup(USE_MOCK_ENV).as_deref().and_then(parse_bool) {
            self.client.use_mock = flag;
        }
    }

    /// Providers that can actually be called with the current keys.
    pub fn configured_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.providers.use_mock || self.providers.api_key(*p).is_some())
            .collect()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.server.port, 8000);
        assert_eq!(s.providers.timeout_secs, 30);
        assert_eq!(s.providers.max_retries, 3);
        assert_eq!(s.providers.retry_delay(), Duration::from_secs(1));
        assert_eq!(s.client.poll_interval(), Duration::from_secs(2));
        assert!((s.evaluation.similarity_threshold - 0.8).abs() < f64::EPSILON);
        assert!(s.storage.path.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let s = Settings::from_toml_str(
            r#"
            [server]
            port = 9100

            [providers]
            max_retries = 5
            models = { openai = "gpt-4o" }
            api_keys = { claude = "sk-ant-123" }
            "#,
        )
        .expect("parse");
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.providers.max_retries, 5);
        assert_eq!(s.providers.timeout_secs, 30);
        assert_eq!(s.providers.model(Provider::Openai), "gpt-4o");
        assert_eq!(s.providers.model(Provider::Google), "gemini-1.5-pro");
        assert_eq!(s.providers.api_key(Provider::Anthropic), Some("sk-ant-123"));
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = Settings::from_toml_str("server = 3").unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn test_placeholder_keys() {
        assert!(is_placeholder_key("your_openai_api_key_here"));
        assert!(is_placeholder_key("  "));
        assert!(!is_placeholder_key("sk-live"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-1"),
            ("ANTHROPIC_API_KEY", "your_anthropic_api_key_here"),
            (API_URL_ENV, "http://api.example:9000/"),
            (USE_MOCK_ENV, "true"),
        ]
        .into_iter()
        .collect();
        let mut s = Settings::default();
        s.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.providers.api_key(Provider::Openai), Some("sk-1"));
        assert_eq!(s.providers.api_key(Provider::Anthropic), None);
        assert_eq!(s.client.api_url, "http://api.example:9000");
        assert!(s.client.use_mock);
        assert_eq!(s.configured_providers(), vec![Provider::Openai]);
    }

    #[test]
    fn test_mock_mode_enables_all_providers() {
        let mut s = Settings::default();
        s.providers.use_mock = true;
        assert_eq!(s.configured_providers().len(), 4);
    }

    #[test]
    fn test_from_file_reads_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[client]\npoll_interval_ms = 500\n").expect("write");
        let s = Settings::from_file(&path).expect("load");
        assert_eq!(s.client.poll_interval_ms, 500);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Settings::from_file(Path::new("/nonexistent/llm-seo-eval.toml")).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }
}
