//! Batch coverage analysis.
//!
//! After selection, each slot's covered values are compared against the
//! values the user's profile actually exhibits. Slots falling short of
//! the target, or missing their dominant value outright, become
//! attribute gaps. The prompt builder turns them into weight boosts on
//! the next request.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{AttributeSlot, PromptSpec, StyleProfile};

/// Minimum in-profile frequency for a value to count toward coverage.
const MIN_SUPPORT: f64 = 0.15;

/// Boost bounds handed to the prompt builder.
const BOOST_MIN: f64 = 1.2;
const BOOST_MAX: f64 = 2.0;

/// A slot whose profile values the batch under-covered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeGap {
    pub slot: AttributeSlot,
    /// Profile values (above support) the batch never showed.
    pub uncovered_values: Vec<String>,
    /// 1 − coverage, in [0, 1].
    pub severity: f64,
    /// Weight multiplier for the next build, in [1.2, 2.0].
    pub recommended_boost: f64,
}

/// Full coverage report for one selection round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    pub selected_ids: Vec<String>,
    /// slot name → covered fraction in [0, 1].
    pub per_slot_coverage: HashMap<String, f64>,
    pub diversity_score: f64,
    pub gaps: Vec<AttributeGap>,
}

/// Analyze the selected specs against the profile.
pub fn analyze(
    selected_ids: Vec<String>,
    selected_specs: &[&PromptSpec],
    profile: &StyleProfile,
    diversity_score: f64,
    target_pct: u32,
) -> CoverageReport {
    let target = f64::from(target_pct.min(100)) / 100.0;
    let mut per_slot_coverage = HashMap::new();
    let mut gaps = Vec::new();

    for slot in AttributeSlot::ALL {
        let Some(distribution) = profile.distribution(slot.as_str()) else {
            continue;
        };
        let supported: Vec<&str> = distribution
            .ranked()
            .into_iter()
            .filter(|(value, _)| distribution.frequency(value) >= MIN_SUPPORT)
            .map(|(value, _)| value)
            .collect();
        if supported.is_empty() {
            continue;
        }

        let covered: HashSet<&str> = selected_specs
            .iter()
            .filter_map(|spec| spec.slot_value(slot))
            .collect();
        let hit = supported.iter().filter(|v| covered.contains(**v)).count();
        let coverage = hit as f64 / supported.len() as f64;
        per_slot_coverage.insert(slot.as_str().to_string(), coverage);

        let dominant_missed = supported
            .first()
            .map(|dominant| !covered.contains(dominant))
            .unwrap_or(false);
        if coverage < target || dominant_missed {
            let severity = (1.0 - coverage).clamp(0.0, 1.0);
            gaps.push(AttributeGap {
                slot,
                uncovered_values: supported
                    .iter()
                    .filter(|v| !covered.contains(**v))
                    .map(|v| v.to_string())
                    .collect(),
                severity,
                recommended_boost: (BOOST_MIN + severity * (BOOST_MAX - BOOST_MIN))
                    .clamp(BOOST_MIN, BOOST_MAX),
            });
        }
    }

    gaps.sort_by(|a, b| {
        b.severity
            .partial_cmp(&a.severity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.slot.as_str().cmp(b.slot.as_str()))
    });

    CoverageReport {
        selected_ids,
        per_slot_coverage,
        diversity_score,
        gaps,
    }
}
