//! Image-model adapter contract.
//!
//! Every external image model sits behind [`ImageModelAdapter`]. The
//! contract is defensive by design: providers disagree wildly about
//! response shapes, so [`extract_image_ref`] normalizes a string URL,
//! an array, or a nested object down to one reference, and cost
//! calculation can never produce NaN.

pub mod flux;
pub mod stub;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

pub use flux::FluxAdapter;
pub use stub::StubAdapter;

/// Output quality tier, a cost multiplier on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Draft,
    Standard,
    Premium,
}

impl QualityTier {
    pub fn cost_multiplier(&self) -> f64 {
        match self {
            Self::Draft => 0.5,
            Self::Standard => 1.0,
            Self::Premium => 2.5,
        }
    }
}

impl Default for QualityTier {
    fn default() -> Self {
        Self::Standard
    }
}

/// Settings for one adapter call.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub width: u32,
    pub height: u32,
    pub tier: QualityTier,
    pub seed: Option<u64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            tier: QualityTier::Standard,
            seed: None,
        }
    }
}

/// What the provider handed back for one image.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    /// A fetchable URL; the orchestrator downloads before upload.
    Url(String),
    /// Raw bytes, ready to upload.
    Bytes(Bytes),
}

/// One successful adapter generation.
#[derive(Debug, Clone)]
pub struct AdapterOutput {
    pub payload: ImagePayload,
    pub seed: Option<u64>,
    /// Finite and non-negative, enforced by construction.
    pub cost_cents: u32,
    /// Provider-reported call parameters, persisted for audits.
    pub params: Value,
    /// Provider quality self-report in [0, 100], when available.
    pub reported_quality: Option<f64>,
}

/// An external image model.
#[async_trait]
pub trait ImageModelAdapter: Send + Sync {
    /// One-time setup (auth probe, model warm-up). Default: nothing.
    async fn initialize(&self) -> EngineResult<()> {
        Ok(())
    }

    /// Generate one image for a rendered prompt.
    async fn generate(
        &self,
        prompt: &str,
        negative_prompt: &str,
        settings: &GenerationSettings,
    ) -> EngineResult<AdapterOutput>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool;

    /// Cost in cents for `count` images at these settings. Total
    /// function: never NaN, never negative.
    fn calculate_cost(&self, settings: &GenerationSettings, count: usize) -> u32;

    fn name(&self) -> &str;
}

/// Cents for `count` images at `base_cents` each, tier-adjusted.
/// Shared by adapters so cost arithmetic stays in one place.
pub fn cost_cents(base_cents: f64, settings: &GenerationSettings, count: usize) -> u32 {
    let base = if base_cents.is_finite() && base_cents > 0.0 {
        base_cents
    } else {
        1.0
    };
    let total = base * settings.tier.cost_multiplier() * count as f64;
    if !total.is_finite() || total < 0.0 {
        return count as u32;
    }
    total.round().max(if count > 0 { 1.0 } else { 0.0 }) as u32
}

/// Pull an image reference out of whatever shape the provider returned:
/// a bare string URL, an array of strings or objects, or an object
/// keyed `url` / `image` / `images` / `output` / `data`, nested to any
/// reasonable depth.
pub fn extract_image_ref(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if looks_like_image_ref(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(extract_image_ref),
        Value::Object(map) => {
            for key in ["url", "image", "images", "output", "data", "result"] {
                if let Some(inner) = map.get(key) {
                    if let Some(found) = extract_image_ref(inner) {
                        return Some(found);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

fn looks_like_image_ref(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("data:image/")
}

/// Map a provider HTTP status onto the engine error kinds.
pub fn classify_status(
    provider: &str,
    status: reqwest::StatusCode,
    body: String,
) -> EngineError {
    let message = format!("HTTP {status}: {body}");
    if status.is_server_error() || status.as_u16() == 429 {
        EngineError::transient(provider, message)
    } else {
        EngineError::permanent(provider, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_never_nan_or_negative() {
        let settings = GenerationSettings::default();
        assert!(cost_cents(f64::NAN, &settings, 3) > 0);
        assert!(cost_cents(-5.0, &settings, 3) > 0);
        assert_eq!(cost_cents(4.0, &settings, 0), 0);
        // Tier multiplier applies.
        let premium = GenerationSettings {
            tier: QualityTier::Premium,
            ..Default::default()
        };
        assert_eq!(cost_cents(4.0, &premium, 2), 20);
    }

    #[test]
    fn test_extract_image_ref_shapes() {
        // Bare string.
        let v = serde_json::json!("https://img.test/a.png");
        assert_eq!(extract_image_ref(&v).unwrap(), "https://img.test/a.png");
        // Array of objects.
        let v = serde_json::json!({"images": [{"url": "https://img.test/b.png", "seed": 7}]});
        assert_eq!(extract_image_ref(&v).unwrap(), "https://img.test/b.png");
        // Nested output array.
        let v = serde_json::json!({"output": ["https://img.test/c.png"]});
        assert_eq!(extract_image_ref(&v).unwrap(), "https://img.test/c.png");
        // Data URL.
        let v = serde_json::json!({"data": {"image": "data:image/png;base64,AAAA"}});
        assert!(extract_image_ref(&v).unwrap().starts_with("data:image/png"));
        // Nothing image-like.
        let v = serde_json::json!({"status": "queued"});
        assert_eq!(extract_image_ref(&v), None);
    }
}
