use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// System prompt every provider receives ahead of the user's question.
pub const SEO_SYSTEM_PROMPT: &str = "You are an expert SEO consultant. Provide detailed, actionable advice for SEO questions. Focus on practical, implementable strategies and current best practices.";

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[value(alias = "gpt")]
    Openai,
    #[value(alias = "claude")]
    #[serde(alias = "claude")]
    Anthropic,
    Perplexity,
    #[value(alias = "gemini")]
    #[serde(alias = "gemini")]
    Google,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Openai,
        Provider::Anthropic,
        Provider::Perplexity,
        Provider::Google,
    ];

    /// Parse a provider name, accepting the product aliases the dashboard
    /// used (`claude`, `gemini`, `gpt`).
    pub fn from_str_loose(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "gpt" => Ok(Provider::Openai),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "perplexity" => Ok(Provider::Perplexity),
            "google" | "gemini" => Ok(Provider::Google),
            other => Err(format!("unknown provider '{other}'")),
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Openai => "gpt-4",
            Provider::Anthropic => "claude-3-5-sonnet-20241022",
            Provider::Perplexity => "sonar-pro",
            Provider::Google => "gemini-1.5-pro",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::Openai => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Perplexity => "PERPLEXITY_API_KEY",
            Provider::Google => "GOOGLE_API_KEY",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Openai => "OpenAI GPT-4",
            Provider::Anthropic => "Anthropic Claude",
            Provider::Perplexity => "Perplexity AI",
            Provider::Google => "Google Gemini",
        }
    }

    /// Chat endpoint for `model`. Gemini puts the model in the path.
    pub fn endpoint(&self, model: &str) -> String {
        match self {
            Provider::Openai => "https://api.openai.com/v1/chat/completions".to_string(),
            Provider::Anthropic => "https://api.anthropic.com/v1/messages".to_string(),
            Provider::Perplexity => "https://api.perplexity.ai/chat/completions".to_string(),
            Provider::Google => format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent"
            ),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Openai => write!(f, "openai"),
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::Perplexity => write!(f, "perplexity"),
            Provider::Google => write!(f, "google"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::from_str_loose(s)
    }
}

// -- OpenAI-compatible chat types (OpenAI and Perplexity) -------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

// -- Anthropic messages types -----------------------------------------------

#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

// -- Gemini generateContent types -------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    pub generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiUsage {
    #[serde(default)]
    pub total_token_count: Option<u32>,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl AnthropicResponse {
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_display() {
        assert_eq!(Provider::Openai.to_string(), "openai");
        assert_eq!(Provider::Anthropic.to_string(), "anthropic");
        assert_eq!(Provider::Perplexity.to_string(), "perplexity");
        assert_eq!(Provider::Google.to_string(), "google");
    }

    #[test]
    fn test_from_str_loose_aliases() {
        assert_eq!(Provider::from_str_loose("claude"), Ok(Provider::Anthropic));
        assert_eq!(Provider::from_str_loose("Gemini"), Ok(Provider::Google));
        assert_eq!(Provider::from_str_loose(" openai "), Ok(Provider::Openai));
        assert!(Provider::from_str_loose("mistral").is_err());
    }

    #[test]
    fn test_serde_accepts_aliases() {
        let p: Provider = serde_json::from_str("\"claude\"").expect("deser");
        assert_eq!(p, Provider::Anthropic);
        let json = serde_json::to_string(&Provider::Google).expect("ser");
        assert_eq!(json, "\"google\"");
    }

    #[test]
    fn test_gemini_endpoint_embeds_model() {
        let url = Provider::Google.endpoint("gemini-1.5-pro");
        assert!(url.ends_with("models/gemini-1.5-pro:generateContent"));
    }

    #[test]
    fn test_openai_response_deserializes() {
        let json = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Hi"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#;
        let resp: ChatCompletionResponse = serde_json::from_str(json).expect("deser");
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hi"));
        assert_eq!(resp.usage.and_then(|u| u.total_tokens), Some(4));
    }

    #[test]
    fn test_anthropic_response_text_joins_text_blocks() {
        let json = r#"{"content":[{"type":"text","text":"Hello "},{"type":"tool_use","id":"t"},{"type":"text","text":"world"}],"stop_reason":"end_turn","usage":{"input_tokens":5,"output_tokens":2}}"#;
        let resp: AnthropicResponse = serde_json::from_str(json).expect("deser");
        assert_eq!(resp.text().as_deref(), Some("Hello world"));
        assert_eq!(resp.usage.map(|u| u.input_tokens + u.output_tokens), Some(7));
    }

    #[test]
    fn test_gemini_request_uses_camel_case() {
        let req = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".into()),
                parts: vec![GeminiPart { text: Some("q".into()) }],
            }],
            system_instruction: None,
            generation_config: GeminiGenerationConfig { temperature: 0.7, max_output_tokens: 2000 },
        };
        let v = serde_json::to_value(&req).expect("ser");
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 2000);
        assert!(v.get("systemInstruction").is_none());
    }

    #[test]
    fn test_gemini_response_text() {
        let json = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"A"},{"text":"B"}]},"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":9}}"#;
        let resp: GeminiResponse = serde_json::from_str(json).expect("deser");
        assert_eq!(resp.text().as_deref(), Some("AB"));
        assert_eq!(resp.usage_metadata.and_then(|u| u.total_token_count), Some(9));
    }

    #[test]
    fn test_gemini_response_empty_candidates() {
        let resp: GeminiResponse = serde_json::from_str(r#"{"candidates":[]}"#).expect("deser");
        assert!(resp.text().is_none());
    }
}
