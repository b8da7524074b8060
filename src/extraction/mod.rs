//! Descriptor extraction.
//!
//! One image in, one validated descriptor out. The vision call is
//! wrapped in a retry loop with exponential backoff; every answer runs
//! through the taxonomy validator before it counts, and quality metrics
//! are recomputed mechanically rather than trusted from the model.

pub mod prompt;
pub mod quality;

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::interfaces::vision::{AnalysisInput, AnalysisRequest, VisionModel};
use crate::taxonomy;
use crate::types::{Descriptor, DescriptorCorrection};

pub use prompt::{extraction_prompt, PROMPT_VERSION, STRICT_RETRY_SUFFIX};

/// Attempts per image, backoff 1s / 2s / 4s between them.
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// A successfully extracted, validated descriptor plus its audit trail.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub descriptor: Descriptor,
    pub corrections: Vec<DescriptorCorrection>,
    /// Attempts consumed, for telemetry.
    pub attempts: u32,
}

/// Extracts descriptors through an injected vision model.
#[derive(Clone)]
pub struct DescriptorExtractor {
    vision: Arc<dyn VisionModel>,
    config: Arc<EngineConfig>,
}

impl DescriptorExtractor {
    pub fn new(vision: Arc<dyn VisionModel>, config: Arc<EngineConfig>) -> Self {
        Self { vision, config }
    }

    /// Analyze one image. Retries on parse failures, validation
    /// failures, low confidence/completeness, and generic fabric
    /// answers; permanent provider errors abort immediately.
    pub async fn extract(&self, image: AnalysisInput) -> EngineResult<Extraction> {
        let mut last_error: Option<EngineError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }

            let mut text = extraction_prompt().to_string();
            if attempt > 0 {
                text.push_str(STRICT_RETRY_SUFFIX);
            }
            let request = AnalysisRequest {
                input: image.clone(),
                prompt: text,
                schema: None,
            };

            let raw = match self.vision.analyze(request).await {
                Ok(raw) => raw,
                Err(e @ EngineError::ExternalPermanent { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "vision call failed");
                    last_error = Some(e);
                    continue;
                }
            };

            match self.process_answer(raw, attempt + 1) {
                Ok(extraction) => return Ok(extraction),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "extraction attempt rejected");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| EngineError::validation("extraction failed with no attempts")))
    }

    /// Parse, validate, and score one model answer.
    fn process_answer(&self, raw: serde_json::Value, attempts: u32) -> EngineResult<Extraction> {
        let descriptor: Descriptor = serde_json::from_value(raw)
            .map_err(|e| EngineError::validation(format!("descriptor parse failed: {e}")))?;

        let outcome = taxonomy::validate(&descriptor);
        if !outcome.ok {
            return Err(EngineError::consistency(
                "descriptor",
                outcome
                    .reason
                    .unwrap_or_else(|| "validation failed".to_string()),
            ));
        }
        if outcome.generic_fabric {
            return Err(EngineError::consistency(
                "garments.fabric.primary_material",
                "generic fabric answer",
            ));
        }

        let mut descriptor = outcome.descriptor;
        quality::score(&mut descriptor);
        descriptor.metadata.prompt_version = PROMPT_VERSION.to_string();

        let threshold = self.config.confidence_retry;
        if descriptor.metadata.overall_confidence < threshold {
            return Err(EngineError::consistency(
                "metadata.overall_confidence",
                format!(
                    "confidence {:.2} below threshold {threshold:.2}",
                    descriptor.metadata.overall_confidence
                ),
            ));
        }
        if descriptor.metadata.completeness_percentage < threshold * 100.0 {
            return Err(EngineError::consistency(
                "metadata.completeness_percentage",
                format!(
                    "completeness {:.1} below threshold {:.1}",
                    descriptor.metadata.completeness_percentage,
                    threshold * 100.0
                ),
            ));
        }

        Ok(Extraction {
            descriptor,
            corrections: outcome.corrections,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::vision::ScriptedVisionModel;

    fn good_answer() -> serde_json::Value {
        serde_json::json!({
            "executive_summary": "Navy wool blazer, studio shot.",
            "garments": [{
                "type": "blazer",
                "silhouette": "tailored",
                "fabric": { "primary_material": "wool suiting" },
                "color_palette": [{ "color_name": "navy", "placement": "body" }],
                "construction_details": ["notched lapel", "double-breasted closure"],
                "neckline": "collared",
                "sleeve_length": "long",
                "collar": "notched lapel",
                "pattern": "solid",
                "layer_index": 0,
                "confidence": 0.92
            }],
            "photography": {
                "shot_composition": { "type": "editorial" },
                "lighting": { "type": "studio lighting", "direction": "front" },
                "camera": { "angle": "eye level", "height": "three-quarter length" },
                "background": "seamless studio"
            },
            "styling_context": "tailored layering",
            "contextual_attributes": { "season": "autumn", "occasion": "work",
                                       "mood_aesthetic": "tailored/minimalist" }
        })
    }

    fn extractor(vision: Arc<ScriptedVisionModel>) -> DescriptorExtractor {
        DescriptorExtractor::new(vision, Arc::new(EngineConfig::default()))
    }

    fn input() -> AnalysisInput {
        AnalysisInput::ImageUrl("http://cdn.test/img.jpg".into())
    }

    #[tokio::test]
    async fn test_clean_answer_extracts_first_attempt() {
        let vision = Arc::new(ScriptedVisionModel::new());
        vision.push(Ok(good_answer()));
        let extraction = extractor(vision.clone()).extract(input()).await.unwrap();
        assert_eq!(extraction.attempts, 1);
        assert_eq!(extraction.descriptor.garments[0].garment_type, "blazer");
        assert_eq!(extraction.descriptor.metadata.prompt_version, PROMPT_VERSION);
        assert!(extraction.descriptor.metadata.overall_confidence >= 0.7);
        assert_eq!(vision.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_fabric_triggers_retry() {
        let vision = Arc::new(ScriptedVisionModel::new());
        let mut generic = good_answer();
        generic["garments"][0]["fabric"]["primary_material"] = "fabric".into();
        vision.push(Ok(generic));
        vision.push(Ok(good_answer()));

        let extraction = extractor(vision.clone()).extract(input()).await.unwrap();
        assert_eq!(extraction.attempts, 2);
        assert_eq!(vision.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let vision = Arc::new(ScriptedVisionModel::new());
        vision.push(Err(EngineError::transient("scripted", "503")));
        vision.push(Ok(good_answer()));
        let extraction = extractor(vision.clone()).extract(input()).await.unwrap();
        assert_eq!(vision.call_count(), 2);
        assert_eq!(extraction.attempts, 2);
    }

    #[tokio::test]
    async fn test_permanent_error_aborts_immediately() {
        let vision = Arc::new(ScriptedVisionModel::new());
        vision.push(Err(EngineError::permanent("scripted", "safety filter")));
        vision.push(Ok(good_answer()));
        let err = extractor(vision.clone()).extract(input()).await.unwrap_err();
        assert!(matches!(err, EngineError::ExternalPermanent { .. }));
        assert_eq!(vision.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_reason() {
        let vision = Arc::new(ScriptedVisionModel::new());
        for _ in 0..3 {
            vision.push(Ok(serde_json::json!({"garments": []})));
        }
        let err = extractor(vision.clone()).extract(input()).await.unwrap_err();
        assert!(matches!(err, EngineError::Consistency { .. }));
        assert_eq!(vision.call_count(), 3);
    }

    #[tokio::test]
    async fn test_corrections_surface_from_validation() {
        let vision = Arc::new(ScriptedVisionModel::new());
        let mut answer = good_answer();
        answer["garments"][0]["collar"] = "shirt collar".into();
        vision.push(Ok(answer));
        let extraction = extractor(vision).extract(input()).await.unwrap();
        assert_eq!(extraction.descriptor.garments[0].garment_type, "shirt jacket");
        assert!(extraction
            .corrections
            .iter()
            .any(|c| c.rule_id == "blazer_shirt_collar"));
    }
}
