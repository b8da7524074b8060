//! Taxonomy: the controlled vocabulary and the descriptor validator.
//!
//! The vocabulary is declared in `vocab.yaml`, embedded at compile time,
//! and deserialized once into an immutable [`Taxonomy`]. Validation
//! applies the logical-consistency rules in [`rules`] and produces
//! correction audit records.

pub mod rules;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Deserialize;

pub use rules::{validate, ValidationOutcome};

/// Embedded vocabulary source.
const VOCAB_YAML: &str = include_str!("vocab.yaml");

/// Global vocabulary, loaded on first use. The YAML is part of the
/// binary, so a parse failure is a build defect, not a runtime
/// condition.
static TAXONOMY: Lazy<Taxonomy> =
    Lazy::new(|| Taxonomy::from_yaml(VOCAB_YAML).expect("embedded vocab.yaml must parse"));

/// The closed-vocabulary fields a descriptor is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VocabSlot {
    Garment,
    Fabric,
    Silhouette,
    Neckline,
    SleeveLength,
    Finish,
    Texture,
    Pattern,
    Collar,
    LightingType,
    LightingDirection,
    CameraAngle,
    CameraHeight,
    ShotType,
    Background,
}

impl VocabSlot {
    pub const ALL: [VocabSlot; 15] = [
        VocabSlot::Garment,
        VocabSlot::Fabric,
        VocabSlot::Silhouette,
        VocabSlot::Neckline,
        VocabSlot::SleeveLength,
        VocabSlot::Finish,
        VocabSlot::Texture,
        VocabSlot::Pattern,
        VocabSlot::Collar,
        VocabSlot::LightingType,
        VocabSlot::LightingDirection,
        VocabSlot::CameraAngle,
        VocabSlot::CameraHeight,
        VocabSlot::ShotType,
        VocabSlot::Background,
    ];

    /// Key under which the slot appears in `vocab.yaml`.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Garment => "garment",
            Self::Fabric => "fabric",
            Self::Silhouette => "silhouette",
            Self::Neckline => "neckline",
            Self::SleeveLength => "sleeve_length",
            Self::Finish => "finish",
            Self::Texture => "texture",
            Self::Pattern => "pattern",
            Self::Collar => "collar",
            Self::LightingType => "lighting_type",
            Self::LightingDirection => "lighting_direction",
            Self::CameraAngle => "camera_angle",
            Self::CameraHeight => "camera_height",
            Self::ShotType => "shot_type",
            Self::Background => "background",
        }
    }
}

#[derive(Debug, Deserialize)]
struct VocabEntry {
    values: Vec<String>,
    #[serde(default)]
    aliases: HashMap<String, String>,
}

/// Immutable controlled vocabulary.
#[derive(Debug)]
pub struct Taxonomy {
    slots: HashMap<String, VocabEntry>,
}

impl Taxonomy {
    /// Parse a vocabulary document.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let slots: HashMap<String, VocabEntry> = serde_yaml::from_str(yaml)?;
        Ok(Self { slots })
    }

    /// The process-wide vocabulary.
    pub fn global() -> &'static Taxonomy {
        &TAXONOMY
    }

    /// Allowed values for a slot.
    pub fn values(&self, slot: VocabSlot) -> &[String] {
        self.slots
            .get(slot.key())
            .map(|e| e.values.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `value` (already canonical) is in the slot's vocabulary.
    pub fn contains(&self, slot: VocabSlot, value: &str) -> bool {
        self.values(slot).iter().any(|v| v == value)
    }

    /// Map a raw model answer onto a canonical vocabulary value.
    ///
    /// Matching is case-insensitive and tolerant of `-`/`_`/whitespace
    /// differences; aliases are consulted after direct values. Returns
    /// `None` when the answer is not in the vocabulary.
    pub fn canonicalize(&self, slot: VocabSlot, raw: &str) -> Option<String> {
        let entry = self.slots.get(slot.key())?;
        let needle = normalize(raw);
        if needle.is_empty() {
            return None;
        }
        for value in &entry.values {
            if normalize(value) == needle {
                return Some(value.clone());
            }
        }
        for (alias, target) in &entry.aliases {
            if normalize(alias) == needle {
                return Some(target.clone());
            }
        }
        None
    }

    /// Canonicalize, falling back to the uncertainty sentinel for
    /// answers outside the vocabulary.
    pub fn canonicalize_or_uncertain(&self, slot: VocabSlot, raw: &str) -> String {
        self.canonicalize(slot, raw)
            .unwrap_or_else(|| crate::types::UNCERTAIN.to_string())
    }
}

/// Lowercase and collapse delimiter noise for comparison.
fn normalize(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '_' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_vocab_parses_and_covers_all_slots() {
        let t = Taxonomy::global();
        for slot in VocabSlot::ALL {
            assert!(
                !t.values(slot).is_empty(),
                "slot {} has no values",
                slot.key()
            );
        }
    }

    #[test]
    fn test_canonicalize_case_and_delimiters() {
        let t = Taxonomy::global();
        assert_eq!(
            t.canonicalize(VocabSlot::Garment, "Bomber-Jacket"),
            Some("bomber jacket".to_string())
        );
        assert_eq!(
            t.canonicalize(VocabSlot::Neckline, "V Neck"),
            Some("v-neck".to_string())
        );
        assert_eq!(
            t.canonicalize(VocabSlot::SleeveLength, "LONG_SLEEVE"),
            Some("long".to_string())
        );
    }

    #[test]
    fn test_canonicalize_aliases() {
        let t = Taxonomy::global();
        assert_eq!(
            t.canonicalize(VocabSlot::Garment, "shacket"),
            Some("shirt jacket".to_string())
        );
        assert_eq!(
            t.canonicalize(VocabSlot::Collar, "peaked lapel"),
            Some("peak lapel".to_string())
        );
    }

    #[test]
    fn test_canonicalize_rejects_unknown() {
        let t = Taxonomy::global();
        assert_eq!(t.canonicalize(VocabSlot::Garment, "spacesuit"), None);
        assert_eq!(
            t.canonicalize_or_uncertain(VocabSlot::Garment, "spacesuit"),
            crate::types::UNCERTAIN
        );
    }
}
