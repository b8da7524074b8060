//! Vision-LLM contract.
//!
//! Used by the descriptor extractor (image analysis) and the feedback
//! processor (critique parsing). One trait, JSON in and JSON out; the
//! caller owns prompt construction and schema validation.

use std::collections::VecDeque;

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// What the model is asked to look at.
#[derive(Debug, Clone)]
pub enum AnalysisInput {
    /// A fetchable image URL.
    ImageUrl(String),
    /// Raw image bytes with their MIME type; sent inline as base64.
    ImageBytes { bytes: Vec<u8>, mime: &'static str },
    /// Plain text (critique parsing).
    Text(String),
}

/// One analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub input: AnalysisInput,
    /// Full instruction prompt, including the output schema.
    pub prompt: String,
    /// Optional JSON schema forwarded to providers that support
    /// structured output natively.
    pub schema: Option<Value>,
}

/// A vision-capable LLM returning JSON.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Run one analysis and return the parsed JSON payload.
    async fn analyze(&self, request: AnalysisRequest) -> EngineResult<Value>;

    /// Provider name for logs and error records.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible implementation
// ---------------------------------------------------------------------------

/// Vision adapter for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiVisionModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiVisionModel {
    pub fn new(
        api_key: impl Into<String>,
        base_url: Option<String>,
        model: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.into(),
        }
    }

    fn build_body(&self, request: &AnalysisRequest) -> Value {
        let content = match &request.input {
            AnalysisInput::ImageUrl(url) => serde_json::json!([
                { "type": "text", "text": request.prompt },
                { "type": "image_url", "image_url": { "url": url } },
            ]),
            AnalysisInput::ImageBytes { bytes, mime } => {
                let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
                serde_json::json!([
                    { "type": "text", "text": request.prompt },
                    { "type": "image_url",
                      "image_url": { "url": format!("data:{mime};base64,{b64}") } },
                ])
            }
            AnalysisInput::Text(text) => {
                serde_json::json!(format!("{}\n\n{}", request.prompt, text))
            }
        };
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
            "response_format": { "type": "json_object" },
        });
        if let Some(schema) = &request.schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": "analysis", "schema": schema },
            });
        }
        body
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionModel {
    async fn analyze(&self, request: AnalysisRequest) -> EngineResult<Value> {
        let body = self.build_body(&request);
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    EngineError::transient(self.name(), e.to_string())
                } else {
                    EngineError::permanent(self.name(), e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {text}");
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(EngineError::transient(self.name(), message))
            } else {
                Err(EngineError::permanent(self.name(), message))
            };
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| EngineError::transient(self.name(), e.to_string()))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                EngineError::permanent(self.name(), "response missing message content")
            })?;
        parse_json_content(content)
    }

    fn name(&self) -> &str {
        "openai-vision"
    }
}

/// Parse model output as JSON, tolerating markdown code fences.
pub fn parse_json_content(content: &str) -> EngineResult<Value> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    serde_json::from_str(stripped)
        .map_err(|e| EngineError::validation(format!("model returned invalid JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Scripted implementation
// ---------------------------------------------------------------------------

/// Deterministic vision model fed from a response queue. Used by tests
/// and by local installs without a provider key.
#[derive(Default)]
pub struct ScriptedVisionModel {
    responses: Mutex<VecDeque<EngineResult<Value>>>,
    /// Count of analyze calls served, for assertions.
    calls: Mutex<usize>,
}

impl ScriptedVisionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response.
    pub fn push(&self, response: EngineResult<Value>) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl VisionModel for ScriptedVisionModel {
    async fn analyze(&self, _request: AnalysisRequest) -> EngineResult<Value> {
        *self.calls.lock() += 1;
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::permanent("scripted", "response queue empty")))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
