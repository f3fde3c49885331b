//! HTTP reasoning client for Anthropic-compatible and OpenAI-compatible APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{GenerateOptions, ReasoningService};
use crate::error::ConductorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReasoningConfig {
    /// "anthropic" (Messages API) or "openai" (chat completions)
    #[serde(default = "default_adapter")]
    pub adapter: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Supports `${ENV_VAR}` references, resolved when the config is loaded.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_adapter() -> String {
    "anthropic".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ReasoningConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Map a non-success HTTP status onto the error taxonomy: request timeouts,
/// rate limiting and server errors are retryable; other client errors are not.
pub fn classify_status(status: StatusCode, body: &str) -> ConductorError {
    let msg = format!("API returned {}: {}", status, truncate(body, 500));
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        ConductorError::transient(msg)
    } else {
        ConductorError::permanent(msg)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub struct HttpReasoningService {
    client: reqwest::Client,
    config: ReasoningConfig,
}

impl HttpReasoningService {
    pub fn new(config: ReasoningConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    fn request_body(&self, prompt: &str, options: &GenerateOptions) -> (String, Value) {
        let base = self.config.base_url.trim_end_matches('/');
        let model = options.model.as_deref().unwrap_or(&self.config.model);
        let max_tokens = options.max_tokens.unwrap_or(self.config.max_tokens);

        let (url, mut body) = match self.config.adapter.as_str() {
            "openai" | "opencode" => {
                let mut messages = Vec::new();
                if let Some(system) = &options.system_prompt {
                    messages.push(serde_json::json!({ "role": "system", "content": system }));
                }
                messages.push(serde_json::json!({ "role": "user", "content": prompt }));
                (
                    format!("{}/chat/completions", base),
                    serde_json::json!({
                        "model": model,
                        "max_tokens": max_tokens,
                        "messages": messages,
                    }),
                )
            }
            _ => {
                let mut body = serde_json::json!({
                    "model": model,
                    "max_tokens": max_tokens,
                    "messages": [{ "role": "user", "content": prompt }],
                });
                if let Some(system) = &options.system_prompt {
                    body["system"] = Value::String(system.clone());
                }
                (format!("{}/v1/messages", base), body)
            }
        };

        if let Some(temp) = options.temperature.and_then(serde_json::Number::from_f64) {
            body["temperature"] = Value::Number(temp);
        }
        (url, body)
    }
}

/// Pull the text out of either response shape.
fn extract_text(json: &Value) -> Option<String> {
    if let Some(blocks) = json.get("content").and_then(|c| c.as_array()) {
        return blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()).map(str::to_string))
            .reduce(|a, b| format!("{}\n{}", a, b));
    }
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, ConductorError> {
        let (url, body) = self.request_body(prompt, options);
        tracing::debug!("[Reasoning] POST {} (adapter: {})", url, self.config.adapter);

        let request = self.client.post(&url).header("content-type", "application/json");
        let request = match self.config.adapter.as_str() {
            "openai" | "opencode" => request.bearer_auth(&self.config.api_key),
            _ => request
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", "2023-06-01"),
        };

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| ConductorError::transient(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ConductorError::transient(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| ConductorError::permanent(format!("Failed to parse response JSON: {}", e)))?;
        extract_text(&json)
            .ok_or_else(|| ConductorError::permanent("Response contained no text content"))
    }
}
