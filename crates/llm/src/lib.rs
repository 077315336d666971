mod client;
mod error;
mod retry;

use async_trait::async_trait;

pub use client::{validate_api_key, LlmClient};
pub use error::LlmError;
pub use retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Gemini,
    Deepseek,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Gemini => "gemini",
            LlmProvider::Deepseek => "deepseek",
            LlmProvider::Local => "local",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "gemini" | "google" => Some(LlmProvider::Gemini),
            "deepseek" => Some(LlmProvider::Deepseek),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

/// Sampling knobs forwarded to every provider that accepts them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LlmSettings {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub system: Option<String>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// The only capability report generation needs from a model: prompt in, text out.
/// Implementations own their retry behavior.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, request: GenerateRequest) -> Result<String, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!(LlmProvider::parse("Gemini"), Some(LlmProvider::Gemini));
        assert_eq!(LlmProvider::parse(" openai "), Some(LlmProvider::OpenAi));
        assert_eq!(LlmProvider::parse("cohere"), None);
        assert_eq!(LlmProvider::Deepseek.as_str(), "deepseek");
    }
}
