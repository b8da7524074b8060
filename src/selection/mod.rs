//! Generation validation and selection.
//!
//! Scores every candidate, drops the ones below threshold, picks a
//! diverse subset of exactly the requested size, and reports coverage
//! against the user's profile. Pure over its inputs; persistence is the
//! orchestrator's job.

pub mod coverage;
pub mod dpp;
pub mod quality;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::types::{PromptSpec, StyleProfile};

pub use coverage::{AttributeGap, CoverageReport};
pub use dpp::{DppSelection, DPP_ALPHA};
pub use quality::{DefaultScorer, QualityScorer, ACCEPTANCE_THRESHOLD};

/// One generated image entering selection.
pub struct SelectionCandidate {
    pub generation_id: String,
    pub prompt_id: String,
    pub spec: PromptSpec,
    /// Raw bytes when available; scoring degrades gracefully without.
    pub bytes: Option<Bytes>,
    pub width: u32,
    pub height: u32,
    /// Adapter-reported quality metadata in [0, 100], if any.
    pub adapter_score: Option<f64>,
}

/// Result of one selection round.
pub struct SelectionOutcome {
    /// Ids chosen for the user, pick order. Pair grouping survives via
    /// each generation's prompt_id.
    pub selected_ids: Vec<String>,
    /// Scored but not selected (quality failures and diversity losers).
    pub rejected_ids: Vec<String>,
    /// Quality score per candidate id.
    pub scores: HashMap<String, f64>,
    pub report: CoverageReport,
}

/// The selector, parameterized over its quality scorer.
#[derive(Clone)]
pub struct Selector {
    scorer: Arc<dyn QualityScorer>,
    coverage_target_pct: u32,
}

impl Selector {
    pub fn new(scorer: Arc<dyn QualityScorer>, coverage_target_pct: u32) -> Self {
        Self {
            scorer,
            coverage_target_pct,
        }
    }

    pub fn with_default_scorer(coverage_target_pct: u32) -> Self {
        Self::new(Arc::new(DefaultScorer), coverage_target_pct)
    }

    /// Score, filter, diversify, and report.
    pub fn select(
        &self,
        candidates: &[SelectionCandidate],
        n: usize,
        profile: &StyleProfile,
    ) -> SelectionOutcome {
        let mut scores = HashMap::new();
        let mut survivors: Vec<&SelectionCandidate> = Vec::new();
        for candidate in candidates {
            let score = self.scorer.score(
                candidate.bytes.as_deref(),
                candidate.width,
                candidate.height,
                candidate.adapter_score,
            );
            scores.insert(candidate.generation_id.clone(), score);
            if score >= ACCEPTANCE_THRESHOLD {
                survivors.push(candidate);
            } else {
                tracing::debug!(
                    generation = %candidate.generation_id,
                    score,
                    "candidate below quality threshold"
                );
            }
        }

        let triples: Vec<(&str, &str, &PromptSpec)> = survivors
            .iter()
            .map(|c| (c.generation_id.as_str(), c.prompt_id.as_str(), &c.spec))
            .collect();
        let mut encoded = dpp::encode_features(&triples);
        for candidate in &mut encoded {
            candidate.quality = scores[&candidate.generation_id];
        }
        let selection = dpp::select(encoded, n, DPP_ALPHA);

        let selected_specs: Vec<&PromptSpec> = selection
            .selected
            .iter()
            .filter_map(|id| {
                survivors
                    .iter()
                    .find(|c| &c.generation_id == id)
                    .map(|c| &c.spec)
            })
            .collect();
        let report = coverage::analyze(
            selection.selected.clone(),
            &selected_specs,
            profile,
            selection.diversity_score,
            self.coverage_target_pct,
        );

        let rejected_ids: Vec<String> = candidates
            .iter()
            .map(|c| c.generation_id.clone())
            .filter(|id| !selection.selected.contains(id))
            .collect();

        SelectionOutcome {
            selected_ids: selection.selected,
            rejected_ids,
            scores,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, garment: &str, size: u32, adapter: f64) -> SelectionCandidate {
        SelectionCandidate {
            generation_id: id.to_string(),
            prompt_id: format!("prompt-{garment}"),
            spec: PromptSpec {
                garment: Some(garment.into()),
                ..Default::default()
            },
            bytes: None,
            width: size,
            height: size,
            adapter_score: Some(adapter),
        }
    }

    #[test]
    fn test_low_quality_dropped_then_diverse_pick() {
        let selector = Selector::with_default_scorer(80);
        let profile = StyleProfile::default();
        let candidates = vec![
            candidate("good-1", "blazer", 1024, 90.0),
            candidate("good-2", "dress", 1024, 90.0),
            candidate("tiny", "coat", 64, 90.0),
        ];
        let outcome = selector.select(&candidates, 2, &profile);
        assert_eq!(outcome.selected_ids.len(), 2);
        assert!(!outcome.selected_ids.contains(&"tiny".to_string()));
        assert!(outcome.rejected_ids.contains(&"tiny".to_string()));
        assert!(outcome.scores["tiny"] < ACCEPTANCE_THRESHOLD);
    }

    #[test]
    fn test_exact_survivors_returned_in_quality_order() {
        let selector = Selector::with_default_scorer(80);
        let profile = StyleProfile::default();
        let candidates = vec![
            candidate("a", "blazer", 1024, 60.0),
            candidate("b", "dress", 1024, 95.0),
        ];
        let outcome = selector.select(&candidates, 2, &profile);
        assert_eq!(outcome.selected_ids[0], "b");
        assert_eq!(outcome.selected_ids.len(), 2);
    }

    #[test]
    fn test_coverage_report_attached() {
        let selector = Selector::with_default_scorer(80);
        let mut profile = StyleProfile::default();
        for _ in 0..4 {
            profile.garments.add("blazer");
            profile.garments.add("dress");
        }
        let candidates = vec![
            candidate("a", "blazer", 1024, 80.0),
            candidate("b", "blazer", 1024, 80.0),
        ];
        let outcome = selector.select(&candidates, 2, &profile);
        // dress never covered: a garment gap with a boost in range.
        let gap = outcome
            .report
            .gaps
            .iter()
            .find(|g| g.slot == crate::types::AttributeSlot::Garment)
            .expect("garment gap");
        assert!(gap.recommended_boost >= 1.2 && gap.recommended_boost <= 2.0);
    }
}
