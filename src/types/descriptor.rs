//! The validated descriptor schema.
//!
//! A [`Descriptor`] is the structured forensic analysis of exactly one
//! portfolio image. It is produced by the extractor, validated and
//! corrected by the taxonomy rules, and consumed by the aggregator. All
//! field reads go through this schema; nothing downstream touches raw
//! vision-model JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Sentinel emitted when the vision model cannot commit to a vocabulary
/// value. Preferred over a guess; the aggregator skips it.
pub const UNCERTAIN: &str = "uncertain";

/// Forensic analysis of a single image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Descriptor {
    /// Short normalized summary of the look.
    #[serde(default)]
    pub executive_summary: String,
    /// One entry per visible garment, ordered by layer.
    #[serde(default)]
    pub garments: Vec<GarmentAnalysis>,
    /// Observed model characteristics. Every field optional; the
    /// extraction protocol forbids guessing.
    #[serde(default)]
    pub model_demographics: ModelDemographics,
    /// Shot composition, lighting, camera, and background.
    #[serde(default)]
    pub photography: Photography,
    /// How the pieces are styled together.
    #[serde(default)]
    pub styling_context: Option<String>,
    /// Season, occasion, and mood.
    #[serde(default)]
    pub contextual_attributes: ContextualAttributes,
    /// Free-form notes on construction and technique.
    #[serde(default)]
    pub technical_fashion_notes: Option<String>,
    /// Quality metrics and provenance.
    #[serde(default)]
    pub metadata: DescriptorMetadata,
}

/// One garment within a descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GarmentAnalysis {
    /// Garment classification from the controlled vocabulary.
    #[serde(rename = "type")]
    pub garment_type: String,
    #[serde(default)]
    pub silhouette: Option<String>,
    #[serde(default)]
    pub fabric: FabricAnalysis,
    #[serde(default)]
    pub color_palette: Vec<ColorEntry>,
    /// Lapels, closures, pockets, ribbing, quilting, topstitching…
    #[serde(default)]
    pub construction_details: Vec<String>,
    #[serde(default)]
    pub neckline: Option<String>,
    #[serde(default)]
    pub sleeve_length: Option<String>,
    #[serde(default)]
    pub collar: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    /// 0 = innermost layer.
    #[serde(default)]
    pub layer_index: u32,
    /// Per-garment confidence in [0,1] when the model reports one.
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Fabric identification for one garment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricAnalysis {
    /// Specific material, e.g. "cotton twill". Generic answers like
    /// "fabric" are rejected by validation.
    #[serde(default)]
    pub primary_material: String,
    #[serde(default)]
    pub weave: Option<String>,
    #[serde(default)]
    pub finish: Option<String>,
    /// Perceived weight class, e.g. "midweight".
    #[serde(default)]
    pub weight: Option<String>,
}

/// A named color and where it sits on the garment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColorEntry {
    pub color_name: String,
    #[serde(default)]
    pub placement: Option<String>,
}

/// Observed (never inferred) model characteristics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDemographics {
    #[serde(default)]
    pub ethnicity: Option<EthnicityObservation>,
    #[serde(default)]
    pub body_type: Option<BodyTypeObservation>,
    /// Approximate bucket such as "20s-30s".
    #[serde(default)]
    pub age_range: Option<String>,
    #[serde(default)]
    pub gender_presentation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EthnicityObservation {
    #[serde(default)]
    pub observed_characteristics: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyTypeObservation {
    #[serde(default)]
    pub overall_build: Option<String>,
}

/// Photography analysis for one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Photography {
    #[serde(default)]
    pub shot_composition: ShotComposition,
    #[serde(default)]
    pub lighting: Lighting,
    #[serde(default)]
    pub camera: CameraSetup,
    #[serde(default)]
    pub background: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShotComposition {
    #[serde(rename = "type", default)]
    pub shot_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lighting {
    #[serde(rename = "type", default)]
    pub lighting_type: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraSetup {
    #[serde(default)]
    pub angle: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
}

/// Season, occasion, and mood read from the styling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextualAttributes {
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub occasion: Option<String>,
    /// Slash- or comma-separated aesthetic labels, e.g.
    /// "minimalist/tailored".
    #[serde(default)]
    pub mood_aesthetic: Option<String>,
}

/// Quality metrics and provenance for a descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorMetadata {
    /// Overall confidence in [0,1], recomputed mechanically after
    /// validation rather than trusted from the model.
    #[serde(default)]
    pub overall_confidence: f64,
    /// Schema fill rate in [0,100].
    #[serde(default)]
    pub completeness_percentage: f64,
    /// Version tag of the extraction prompt that produced this record.
    #[serde(default)]
    pub prompt_version: String,
    /// Per-field confidence where the model reported it.
    #[serde(default)]
    pub field_confidence: HashMap<String, f64>,
}

impl Default for DescriptorMetadata {
    fn default() -> Self {
        Self {
            overall_confidence: 0.0,
            completeness_percentage: 0.0,
            prompt_version: String::new(),
            field_confidence: HashMap::new(),
        }
    }
}

/// Audit record for a single auto-correction applied by a
/// logical-consistency rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorCorrection {
    /// Dotted path, e.g. `garments[0].type`.
    pub field_path: String,
    /// What the model said.
    pub ai_value: String,
    /// What the rule decided.
    pub corrected_value: String,
    /// Stable identifier of the rule that fired.
    pub rule_id: String,
}

impl Descriptor {
    /// Whether a value is present and not the uncertainty sentinel or a
    /// known non-answer.
    pub fn is_informative(value: &str) -> bool {
        let v = value.trim().to_ascii_lowercase();
        !v.is_empty()
            && v != UNCERTAIN
            && v != "not_specified"
            && v != "not specified"
            && v != "not_visible"
            && v != "not visible"
            && v != "unknown"
            && v != "n/a"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_descriptor() {
        let json = serde_json::json!({
            "executive_summary": "Navy tailored blazer over cream knit.",
            "garments": [{
                "type": "blazer",
                "fabric": { "primary_material": "wool suiting" },
                "color_palette": [{ "color_name": "navy" }],
                "collar": "notched lapel"
            }],
            "metadata": { "overall_confidence": 0.9, "completeness_percentage": 75.0 }
        });
        let d: Descriptor = serde_json::from_value(json).unwrap();
        assert_eq!(d.garments.len(), 1);
        assert_eq!(d.garments[0].garment_type, "blazer");
        assert_eq!(d.garments[0].fabric.primary_material, "wool suiting");
        assert!(d.model_demographics.ethnicity.is_none());
    }

    #[test]
    fn test_is_informative_filters_sentinels() {
        assert!(Descriptor::is_informative("cotton twill"));
        assert!(!Descriptor::is_informative("uncertain"));
        assert!(!Descriptor::is_informative("not_visible"));
        assert!(!Descriptor::is_informative(""));
        assert!(!Descriptor::is_informative("  Unknown "));
    }
}
