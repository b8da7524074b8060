//! Prompt specs and the attribute-slot space.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::UserId;

/// The attribute slots a prompt is assembled from. These are also the
/// arms-dimension of the bandit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeSlot {
    Garment,
    Fabric,
    Color,
    Lighting,
    Camera,
    Background,
    Silhouette,
    Finish,
    Details,
}

impl AttributeSlot {
    /// All slots, in the order they are sampled and rendered.
    pub const ALL: [AttributeSlot; 9] = [
        AttributeSlot::Garment,
        AttributeSlot::Fabric,
        AttributeSlot::Color,
        AttributeSlot::Lighting,
        AttributeSlot::Camera,
        AttributeSlot::Background,
        AttributeSlot::Silhouette,
        AttributeSlot::Finish,
        AttributeSlot::Details,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Garment => "garment",
            Self::Fabric => "fabric",
            Self::Color => "color",
            Self::Lighting => "lighting",
            Self::Camera => "camera",
            Self::Background => "background",
            Self::Silhouette => "silhouette",
            Self::Finish => "finish",
            Self::Details => "details",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "garment" => Some(Self::Garment),
            "fabric" => Some(Self::Fabric),
            "color" => Some(Self::Color),
            "lighting" => Some(Self::Lighting),
            "camera" => Some(Self::Camera),
            "background" => Some(Self::Background),
            "silhouette" => Some(Self::Silhouette),
            "finish" => Some(Self::Finish),
            "details" => Some(Self::Details),
            _ => None,
        }
    }

    /// Default rendering importance for the slot.
    pub fn default_weight(&self) -> f64 {
        match self {
            Self::Garment => 0.8,
            Self::Color | Self::Fabric | Self::Lighting => 0.7,
            Self::Silhouette | Self::Camera => 0.6,
            Self::Finish | Self::Background => 0.5,
            Self::Details => 0.4,
        }
    }
}

impl std::fmt::Display for AttributeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified concreteness of a user command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specificity {
    #[default]
    Low,
    Medium,
    High,
}

impl Specificity {
    /// Bandit exploration temperature for this specificity.
    pub fn creativity(&self) -> f64 {
        match self {
            Self::Low => 0.8,
            Self::Medium => 0.5,
            Self::High => 0.2,
        }
    }

    /// How strongly the style profile overrides underspecified slots.
    pub fn brand_dna_strength(&self) -> f64 {
        match self {
            Self::Low => 0.9,
            Self::Medium => 0.6,
            Self::High => 0.3,
        }
    }

    /// Whether user-specified fields are frozen against bandit sampling.
    pub fn respect_user_intent(&self) -> bool {
        matches!(self, Self::High)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Structured intent for a single image generation.
///
/// Built by the prompt builder, rendered to weighted text separately, and
/// referenced (weakly) by every generation it produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptSpec {
    pub id: String,
    pub user_id: UserId,
    pub garment: Option<String>,
    pub silhouette: Option<String>,
    pub color_palette: Vec<String>,
    pub fabric: Option<String>,
    pub finish: Option<String>,
    pub lighting_type: Option<String>,
    pub lighting_direction: Option<String>,
    pub camera_angle: Option<String>,
    pub camera_height: Option<String>,
    pub background: Option<String>,
    pub details: Vec<String>,
    /// Learned pose tokens; empty means the front-facing defaults apply.
    pub model_pose: Vec<String>,
    /// Learned modifier tokens the builder picked, kept on the spec so
    /// feedback can credit or blame them later.
    #[serde(default)]
    pub modifier_tokens: Vec<String>,
    /// Named aesthetic theme used as the context-setting prefix.
    pub cluster_label: Option<String>,
    /// Effective per-slot weights after signature and gap boosts.
    pub slot_weights: HashMap<AttributeSlot, f64>,
    /// Slots frozen by a high-specificity user command; excluded from
    /// bandit sampling and from bandit reward updates.
    pub frozen_slots: HashSet<AttributeSlot>,
    pub creativity: f64,
    pub is_exploration: bool,
    /// Set when the word budget forced truncation.
    pub truncated: bool,
}

impl PromptSpec {
    /// The value this spec assigned to a slot, if any. Multi-valued
    /// slots report their first entry.
    pub fn slot_value(&self, slot: AttributeSlot) -> Option<&str> {
        match slot {
            AttributeSlot::Garment => self.garment.as_deref(),
            AttributeSlot::Fabric => self.fabric.as_deref(),
            AttributeSlot::Color => self.color_palette.first().map(String::as_str),
            AttributeSlot::Lighting => self.lighting_type.as_deref(),
            AttributeSlot::Camera => self.camera_angle.as_deref(),
            AttributeSlot::Background => self.background.as_deref(),
            AttributeSlot::Silhouette => self.silhouette.as_deref(),
            AttributeSlot::Finish => self.finish.as_deref(),
            AttributeSlot::Details => self.details.first().map(String::as_str),
        }
    }

    /// Effective weight for a slot (default where unset).
    pub fn weight(&self, slot: AttributeSlot) -> f64 {
        self.slot_weights
            .get(&slot)
            .copied()
            .unwrap_or_else(|| slot.default_weight())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specificity_mapping() {
        assert_eq!(Specificity::Low.creativity(), 0.8);
        assert_eq!(Specificity::Medium.brand_dna_strength(), 0.6);
        assert!(Specificity::High.respect_user_intent());
        assert!(!Specificity::Low.respect_user_intent());
    }

    #[test]
    fn test_slot_parse_round_trip() {
        for slot in AttributeSlot::ALL {
            assert_eq!(AttributeSlot::parse(slot.as_str()), Some(slot));
        }
        assert_eq!(AttributeSlot::parse("mood"), None);
    }

    #[test]
    fn test_slot_value_reads_first_of_multi() {
        let spec = PromptSpec {
            color_palette: vec!["navy".into(), "cream".into()],
            ..Default::default()
        };
        assert_eq!(spec.slot_value(AttributeSlot::Color), Some("navy"));
        assert_eq!(spec.slot_value(AttributeSlot::Garment), None);
    }
}
