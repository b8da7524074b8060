//! Flux adapter (fal.ai-style queue API).

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

use super::{
    classify_status, cost_cents, extract_image_ref, AdapterOutput, GenerationSettings,
    ImageModelAdapter, ImagePayload,
};

/// Base cost per standard-tier image, cents.
const BASE_COST_CENTS: f64 = 4.0;

/// Flux text-to-image over an HTTP queue endpoint.
pub struct FluxAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl FluxAdapter {
    pub fn new(
        api_key: impl Into<String>,
        base_url: Option<String>,
        model: Option<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| "https://queue.fal.run".to_string()),
            model: model.unwrap_or_else(|| "fal-ai/flux/dev".to_string()),
        }
    }

    fn request_body(
        &self,
        prompt: &str,
        negative_prompt: &str,
        settings: &GenerationSettings,
    ) -> Value {
        let mut body = serde_json::json!({
            "prompt": prompt,
            "negative_prompt": negative_prompt,
            "image_size": { "width": settings.width, "height": settings.height },
            "num_images": 1,
        });
        if let Some(seed) = settings.seed {
            body["seed"] = seed.into();
        }
        body
    }
}

#[async_trait]
impl ImageModelAdapter for FluxAdapter {
    async fn generate(
        &self,
        prompt: &str,
        negative_prompt: &str,
        settings: &GenerationSettings,
    ) -> EngineResult<AdapterOutput> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), self.model);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {}", self.api_key))
            .json(&self.request_body(prompt, negative_prompt, settings))
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
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(self.name(), status, body));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| EngineError::transient(self.name(), e.to_string()))?;

        if let Some(error) = payload.get("error").and_then(Value::as_str) {
            return Err(EngineError::permanent(self.name(), error.to_string()));
        }

        let image_ref = extract_image_ref(&payload).ok_or_else(|| {
            EngineError::permanent(self.name(), "no image reference in provider response")
        })?;

        let payload_out = if let Some(encoded) = image_ref
            .strip_prefix("data:image/png;base64,")
            .or_else(|| image_ref.strip_prefix("data:image/jpeg;base64,"))
        {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| {
                    EngineError::permanent(self.name(), format!("bad data url: {e}"))
                })?;
            ImagePayload::Bytes(Bytes::from(bytes))
        } else {
            ImagePayload::Url(image_ref)
        };

        let seed = payload
            .get("seed")
            .and_then(Value::as_u64)
            .or_else(|| payload["images"][0]["seed"].as_u64());

        Ok(AdapterOutput {
            payload: payload_out,
            seed,
            cost_cents: self.calculate_cost(settings, 1),
            params: serde_json::json!({
                "model": self.model,
                "width": settings.width,
                "height": settings.height,
                "tier": settings.tier,
            }),
            reported_quality: None,
        })
    }

    async fn health_check(&self) -> bool {
        // The queue root answers unauthenticated; any response means
        // reachable.
        self.client
            .get(self.base_url.trim_end_matches('/'))
            .send()
            .await
            .is_ok()
    }

    fn calculate_cost(&self, settings: &GenerationSettings, count: usize) -> u32 {
        cost_cents(BASE_COST_CENTS, settings, count)
    }

    fn name(&self) -> &str {
        "flux"
    }
}
