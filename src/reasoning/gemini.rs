//! Gemini API client
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{GenerationConstraints, ReasoningService};
use crate::error::ReasoningError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Result<Self, ReasoningError> {
        if api_key.trim().is_empty() {
            return Err(ReasoningError::NotConfigured(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| ReasoningError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }
}

#[async_trait]
impl ReasoningService for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String, ReasoningError> {
        let request = build_request(prompt, constraints);

        debug!(
            model = %self.model,
            json_only = constraints.json_only,
            timeout_ms = constraints.timeout.as_millis() as u64,
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(self.endpoint())
            .timeout(constraints.timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Gemini API error response: {}", error_text);
            return Err(classify_status(status, error_text));
        }

        let gemini_response: GeminiResponse = response.json().await?;
        extract_text(gemini_response)
    }
}

/// 429 and 5xx may pass on retry; any other rejection will not
fn classify_status(status: StatusCode, body: String) -> ReasoningError {
    let message = format!("{}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ReasoningError::Upstream(message)
    } else {
        ReasoningError::Rejected(message)
    }
}

fn build_request(prompt: &str, constraints: &GenerationConstraints) -> GeminiRequest {
    GeminiRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: constraints.temperature,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: constraints.max_output_tokens,
            response_mime_type: constraints
                .json_only
                .then(|| "application/json".to_string()),
        },
        system_instruction: (!constraints.system_instruction.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: constraints.system_instruction.clone(),
            }],
        }),
    }
}

fn extract_text(response: GeminiResponse) -> Result<String, ReasoningError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ReasoningError::Malformed("No response from Gemini API".to_string()))?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(ReasoningError::Rejected("response blocked by safety filter".to_string()));
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ReasoningError::Malformed("Empty response from Gemini".to_string()));
    }

    Ok(text)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}
