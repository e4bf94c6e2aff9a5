// Completion providers over plain HTTP
use crate::api::middleware::AppError;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;

/// A text-in, text-out model endpoint
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the model's text, or an empty string when it produced none
    async fn complete(&self, prompt: &str) -> Result<String, AppError>;

    fn name(&self) -> &str;
}

/// Connection settings shared by both providers
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &Value,
    provider: &str,
) -> Result<Value, AppError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| AppError::LlmService(format!("Failed to call {}: {}", provider, e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        return Err(AppError::LlmService(format!(
            "{} returned error {}: {}",
            provider, status, error_text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::LlmService(format!("Failed to parse {} response: {}", provider, e)))
}

/// OpenAI Responses API
pub struct OpenAiProvider {
    http_client: HttpClient,
    endpoint: ProviderEndpoint,
}

impl OpenAiProvider {
    pub fn new(http_client: HttpClient, endpoint: ProviderEndpoint) -> Self {
        Self { http_client, endpoint }
    }
}

/// `output_text` when present, else the first `output_text` content part
pub fn openai_output_text(response: &Value) -> String {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.is_empty() {
            return text.to_string();
        }
    }

    response
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .find(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .and_then(|part| part.get("text").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

#[async_trait::async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, AppError> {
        let url = format!("{}/responses", self.endpoint.base_url.trim_end_matches('/'));
        let request = self
            .http_client
            .post(url)
            .bearer_auth(&self.endpoint.api_key)
            .timeout(Duration::from_secs(self.endpoint.timeout_secs));

        let body = json!({ "model": self.endpoint.model, "input": prompt });
        let response = post_json(request, &body, "OpenAI").await?;
        Ok(openai_output_text(&response))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Gemini generateContent API
pub struct GeminiProvider {
    http_client: HttpClient,
    endpoint: ProviderEndpoint,
}

impl GeminiProvider {
    pub fn new(http_client: HttpClient, endpoint: ProviderEndpoint) -> Self {
        Self { http_client, endpoint }
    }
}

/// Concatenated text parts of the first candidate
pub fn gemini_output_text(response: &Value) -> String {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl CompletionProvider for GeminiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, AppError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint.base_url.trim_end_matches('/'),
            self.endpoint.model
        );
        let request = self
            .http_client
            .post(url)
            .header("x-goog-api-key", &self.endpoint.api_key)
            .timeout(Duration::from_secs(self.endpoint.timeout_secs));

        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let response = post_json(request, &body, "Gemini").await?;
        Ok(gemini_output_text(&response))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
