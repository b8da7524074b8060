//! The aggregated style profile.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Value counts for one attribute slot, sorted views computed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotDistribution {
    /// value → occurrence count across all garments of all descriptors.
    pub counts: HashMap<String, u32>,
}

impl SlotDistribution {
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Values sorted by descending count, ties broken alphabetically so
    /// aggregation stays deterministic.
    pub fn ranked(&self) -> Vec<(&str, u32)> {
        let mut pairs: Vec<(&str, u32)> = self
            .counts
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        pairs
    }

    /// The most frequent value, if any.
    pub fn top(&self) -> Option<(&str, u32)> {
        self.ranked().into_iter().next()
    }

    /// Relative frequency of `value` in [0,1]; 0 for an empty slot.
    pub fn frequency(&self, value: &str) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        f64::from(self.counts.get(value).copied().unwrap_or(0)) / f64::from(total)
    }

    pub fn add(&mut self, value: &str) {
        *self.counts.entry(value.to_string()).or_insert(0) += 1;
    }
}

/// A high-confidence standout garment surfaced by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignaturePiece {
    /// e.g. "quilted vest in nylon taffeta".
    pub label: String,
    pub garment_type: String,
    /// The construction detail that makes it stand out.
    pub standout_detail: String,
    pub confidence: f64,
}

/// Derived, replaceable style signal for one user's active portfolio.
///
/// Regenerated on demand from the full descriptor set; never mutated in
/// place. Readers always see a complete row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StyleProfile {
    pub user_id: UserId,
    pub portfolio_id: String,
    pub garments: SlotDistribution,
    pub colors: SlotDistribution,
    pub fabrics: SlotDistribution,
    pub silhouettes: SlotDistribution,
    pub lighting: SlotDistribution,
    pub camera: SlotDistribution,
    pub backgrounds: SlotDistribution,
    /// Cleaned, capitalized themes with at least threshold support,
    /// most frequent first.
    pub aesthetic_themes: Vec<String>,
    /// Construction detail → count, top-k only.
    pub construction_patterns: Vec<(String, u32)>,
    pub signature_pieces: Vec<SignaturePiece>,
    pub summary_text: String,
    pub total_images: u32,
    /// Clamped to [0, 9.999] for the DECIMAL(4,3) column.
    pub avg_confidence: f64,
    /// Clamped to [0, 999.99] for the DECIMAL(5,2) column.
    pub avg_completeness: f64,
    pub generated_at: Option<DateTime<Utc>>,
}

impl StyleProfile {
    /// Distribution for a prompt-attribute slot name, where one exists.
    /// Color and details have no closed vocabulary but colors do have a
    /// learned distribution; details never do.
    pub fn distribution(&self, slot: &str) -> Option<&SlotDistribution> {
        match slot {
            "garment" => Some(&self.garments),
            "color" => Some(&self.colors),
            "fabric" => Some(&self.fabrics),
            "silhouette" => Some(&self.silhouettes),
            "lighting" => Some(&self.lighting),
            "camera" => Some(&self.camera),
            "background" => Some(&self.backgrounds),
            _ => None,
        }
    }

    /// Whether `value` clears the signature-frequency threshold in the
    /// given slot.
    pub fn is_signature(&self, slot: &str, value: &str, threshold: f64) -> bool {
        self.distribution(slot)
            .map(|d| d.frequency(value) > threshold)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranked_is_deterministic_on_ties() {
        let mut d = SlotDistribution::default();
        d.add("navy");
        d.add("cream");
        d.add("navy");
        d.add("black");
        let ranked = d.ranked();
        assert_eq!(ranked[0], ("navy", 2));
        // "black" before "cream" on the tie.
        assert_eq!(ranked[1], ("black", 1));
        assert_eq!(ranked[2], ("cream", 1));
    }

    #[test]
    fn test_frequency_empty_slot_is_zero() {
        let d = SlotDistribution::default();
        assert_eq!(d.frequency("navy"), 0.0);
    }

    #[test]
    fn test_is_signature_uses_threshold() {
        let mut p = StyleProfile::default();
        for _ in 0..6 {
            p.fabrics.add("cotton twill");
        }
        for _ in 0..4 {
            p.fabrics.add("ponte knit");
        }
        assert!(p.is_signature("fabric", "cotton twill", 0.4));
        assert!(!p.is_signature("fabric", "ponte knit", 0.4));
        assert!(!p.is_signature("details", "topstitching", 0.0));
    }
}
