use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::LlmError;
use crate::retry::RetryPolicy;
use crate::{GenerateRequest, LlmProvider, LlmRequest, LlmResponse, LlmSettings, TextGenerator};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// HTTP client for the hosted providers plus an offline `local` mode.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    settings: LlmSettings,
    retry: RetryPolicy,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi { api_key: String, base_url: String },
    Anthropic { api_key: String },
    Gemini { api_key: String },
    Deepseek { api_key: String },
    Local,
}

impl LlmClient {
    /// Reads the provider's API key from the environment and validates its shape.
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self, LlmError> {
        let config = match provider {
            LlmProvider::OpenAi => ProviderConfig::OpenAi {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| OPENAI_BASE_URL.to_string()),
            },
            LlmProvider::Anthropic => ProviderConfig::Anthropic {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
            },
            LlmProvider::Gemini => ProviderConfig::Gemini {
                api_key: read_api_key("GEMINI_API_KEY")?,
            },
            LlmProvider::Deepseek => ProviderConfig::Deepseek {
                api_key: read_api_key("DEEPSEEK_API_KEY")?,
            },
            LlmProvider::Local => ProviderConfig::Local,
        };
        let model = model.into();
        info!(provider = provider.as_str(), model = %model, "model client initialized");
        Ok(Self {
            http: Client::new(),
            provider,
            model,
            settings: LlmSettings::default(),
            retry: RetryPolicy::default(),
            config,
        })
    }

    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: LlmProvider::Local,
            model: "local".to_string(),
            settings: LlmSettings::default(),
            retry: RetryPolicy::no_retry(),
            config: ProviderConfig::Local,
        }
    }

    pub fn with_settings(mut self, settings: LlmSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One request, no retries.
    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let model = req.model.as_deref().unwrap_or(&self.model);
        match &self.config {
            ProviderConfig::OpenAi { api_key, base_url } => {
                if openai_uses_responses(model) {
                    self.chat_openai_responses(api_key, base_url, model, req).await
                } else {
                    self.chat_completions(api_key, base_url, model, req).await
                }
            }
            ProviderConfig::Deepseek { api_key } => {
                self.chat_completions(api_key, DEEPSEEK_BASE_URL, model, req)
                    .await
            }
            ProviderConfig::Anthropic { api_key } => {
                self.chat_anthropic(api_key, model, req).await
            }
            ProviderConfig::Gemini { api_key } => self.chat_gemini(api_key, model, req).await,
            ProviderConfig::Local => Ok(LlmResponse {
                content: synthesize_local_response(req),
                prompt_tokens: 0,
                completion_tokens: 0,
            }),
        }
    }

    async fn chat_completions(
        &self,
        api_key: &str,
        base_url: &str,
        model: &str,
        req: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": req.user }));
        let mut payload = json!({ "model": model, "messages": messages });
        if let Some(temperature) = self.settings.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.settings.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        let value: Value = send_json(self.http.post(url).bearer_auth(api_key).json(&payload)).await?;
        let content = extract_openai_text(&value)
            .ok_or_else(|| LlmError::Decode("missing text in chat completion".into()))?;
        let usage: OpenAiUsage = value
            .get("usage")
            .and_then(|usage| serde_json::from_value(usage.clone()).ok())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn chat_openai_responses(
        &self,
        api_key: &str,
        base_url: &str,
        model: &str,
        req: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/responses", base_url.trim_end_matches('/'));
        let mut input = Vec::new();
        if let Some(system) = &req.system {
            input.push(json!({
                "role": "system",
                "content": [{ "type": "input_text", "text": system }],
            }));
        }
        input.push(json!({
            "role": "user",
            "content": [{ "type": "input_text", "text": req.user }],
        }));
        let mut payload = json!({ "model": model, "input": input });
        if let Some(temperature) = self.settings.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.settings.max_tokens {
            payload["max_output_tokens"] = json!(max_tokens);
        }
        let value: Value = send_json(self.http.post(url).bearer_auth(api_key).json(&payload)).await?;
        let content = extract_openai_text(&value)
            .ok_or_else(|| LlmError::Decode("missing text in OpenAI response".into()))?;
        let (prompt_tokens, completion_tokens) = parse_responses_usage(&value);
        Ok(LlmResponse {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }

    async fn chat_anthropic(
        &self,
        api_key: &str,
        model: &str,
        req: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let mut payload = json!({
            "model": model,
            "max_tokens": self.settings.max_tokens.unwrap_or(1024),
            "messages": [{ "role": "user", "content": req.user }],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = self.settings.temperature {
            payload["temperature"] = json!(temperature);
        }
        let response: AnthropicResponse = send_json(
            self.http
                .post(ANTHROPIC_URL)
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&payload),
        )
        .await?;
        let content = response
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| LlmError::Decode("missing text in Anthropic response".into()))?;
        let usage = response.usage.unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }

    async fn chat_gemini(
        &self,
        api_key: &str,
        model: &str,
        req: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let mut prompt = String::new();
        if let Some(system) = &req.system {
            prompt.push_str("[SYSTEM]\n");
            prompt.push_str(system.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str(&req.user);
        let mut generation = json!({});
        if let Some(temperature) = self.settings.temperature {
            generation["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.settings.max_tokens {
            generation["maxOutputTokens"] = json!(max_tokens);
        }
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": generation,
        });
        let url = format!("{GEMINI_BASE_URL}/{model}:generateContent");
        let response: GeminiResponse = send_json(
            self.http
                .post(url)
                .query(&[("key", api_key)])
                .json(&payload),
        )
        .await?;
        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.clone())
        {
            return Err(LlmError::ContentPolicy(format!("prompt blocked: {reason}")));
        }
        let content = response
            .candidates
            .and_then(|mut candidates| candidates.pop())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().find_map(|part| part.text))
            .ok_or_else(|| LlmError::Decode("missing text in Gemini response".into()))?;
        let usage = response.usage.unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate_text(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let req = LlmRequest {
            system: request.system,
            user: request.prompt,
            model: request.model,
        };
        let response = self
            .retry
            .run(|attempt| {
                debug!(
                    attempt,
                    max_attempts = self.retry.max_attempts,
                    provider = self.provider.as_str(),
                    "generating text"
                );
                self.chat(&req)
            })
            .await?;
        debug!(
            tokens = response.total_tokens(),
            chars = response.content.len(),
            "model response received"
        );
        Ok(response.content)
    }
}

/// Sends the request and decodes a successful body, classifying failures.
async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, LlmError> {
    let response = request.send().await?;
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await?;
    if !status.is_success() {
        return Err(LlmError::from_status(status.as_u16(), &body, retry_after));
    }
    serde_json::from_str(&body).map_err(|err| LlmError::Decode(err.to_string()))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|text| text.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs.max(1)))
}

/// Deterministic offline answer: echoes the leading words of the task.
fn synthesize_local_response(req: &LlmRequest) -> String {
    let body = extract_context_block(&req.user, "## Task", "## ");
    let summary = summarize_text(&body, 60);
    if summary.is_empty() {
        return summarize_text(&req.user, 60);
    }
    summary
}

fn openai_uses_responses(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.starts_with("gpt-4.1") || lower.starts_with("gpt-4o") || lower.starts_with("o1")
}

fn parse_responses_usage(value: &Value) -> (u32, u32) {
    let Some(usage) = value.get("usage") else {
        return (0, 0);
    };
    let read = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0) as u32;
    (read("input_tokens"), read("output_tokens"))
}

fn extract_context_block(text: &str, start_marker: &str, stop_marker: &str) -> String {
    if let Some(start_idx) = text.find(start_marker) {
        let after = &text[start_idx + start_marker.len()..];
        if let Some(end_idx) = after.find(stop_marker) {
            return after[..end_idx].trim().to_string();
        }
        return after.trim().to_string();
    }
    text.trim().to_string()
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn read_api_key(var: &str) -> Result<String, LlmError> {
    let value = env::var(var).map_err(|_| LlmError::Config(format!("{var} is not set")))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

pub fn validate_api_key(var: &str, value: &str) -> Result<(), LlmError> {
    let expected = if var.contains("ANTHROPIC") {
        "sk-ant-"
    } else if var.contains("OPENAI") || var.contains("DEEPSEEK") {
        "sk-"
    } else if var.contains("GEMINI") {
        "AI"
    } else {
        return Ok(());
    };
    if value.starts_with(expected) {
        Ok(())
    } else {
        Err(LlmError::Config(format!("{var} must start with '{expected}'")))
    }
}

fn extract_openai_text(value: &Value) -> Option<String> {
    if let Some(outputs) = value.get("output").and_then(Value::as_array) {
        let text = outputs
            .iter()
            .filter_map(|output| output.get("content").and_then(Value::as_array))
            .flatten()
            .find_map(|block| block.get("text").and_then(Value::as_str));
        if let Some(text) = text {
            return Some(text.to_string());
        }
    }
    if let Some(text) = value
        .get("output_text")
        .and_then(Value::as_array)
        .and_then(|texts| texts.first())
        .and_then(Value::as_str)
    {
        return Some(text.to_string());
    }
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiFeedback>,
    #[serde(rename = "usageMetadata")]
    usage: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_tokens: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_keys_are_checked_by_prefix() {
        assert!(validate_api_key("OPENAI_API_KEY", "sk-abc").is_ok());
        assert!(validate_api_key("ANTHROPIC_API_KEY", "sk-abc").is_err());
        assert!(validate_api_key("GEMINI_API_KEY", "AIza123").is_ok());
        let err = validate_api_key("DEEPSEEK_API_KEY", "key").unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: DEEPSEEK_API_KEY must start with 'sk-'"
        );
    }

    #[test]
    fn openai_text_is_found_in_every_shape() {
        let responses = json!({"output": [{"content": [{"type": "output_text", "text": "hi"}]}]});
        assert_eq!(extract_openai_text(&responses).as_deref(), Some("hi"));
        let chat = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_openai_text(&chat).as_deref(), Some("hello"));
        let parts = json!({"choices": [{"message": {"content": [{"text": "part"}]}}]});
        assert_eq!(extract_openai_text(&parts).as_deref(), Some("part"));
        assert_eq!(extract_openai_text(&json!({})), None);
    }

    #[tokio::test]
    async fn local_provider_answers_offline() {
        let client = LlmClient::local();
        let prompt = "## Role\nAnalyst\n\n## Task\nSummarize revenue by region\n\n## Constraints\n- short";
        let text = client
            .generate_text(GenerateRequest::new(prompt))
            .await
            .unwrap();
        assert_eq!(text, "Summarize revenue by region");
        let plain = client
            .generate_text(GenerateRequest::new("just   words here"))
            .await
            .unwrap();
        assert_eq!(plain, "just words here");
    }
}
