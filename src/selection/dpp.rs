//! Diverse-subset selection.
//!
//! Greedy determinantal-flavored pick: each step takes the candidate
//! maximizing `α·quality − (1−α)·max_similarity_to_selected` until the
//! requested count is reached. With exactly N survivors this degrades
//! to a quality sort, which is the intended boundary behavior.

use std::collections::HashMap;

use crate::types::{AttributeSlot, PromptSpec};

/// Fixed trade-off between quality and diversity.
pub const DPP_ALPHA: f64 = 0.6;

/// One surviving candidate entering selection.
#[derive(Debug, Clone)]
pub struct DppCandidate {
    pub generation_id: String,
    pub prompt_id: String,
    /// Quality score in [0, 100].
    pub quality: f64,
    /// One-hot feature vector over the batch's (slot, value) space.
    pub features: Vec<f32>,
}

/// Result of a selection round.
#[derive(Debug, Clone)]
pub struct DppSelection {
    /// Chosen generation ids, pick order.
    pub selected: Vec<String>,
    /// 1 − mean pairwise similarity of the chosen set, in [0, 1].
    pub diversity_score: f64,
}

/// Encode candidates into one-hot vectors over the distinct
/// (slot, value) pairs present in the batch.
pub fn encode_features(specs: &[(&str, &str, &PromptSpec)]) -> Vec<DppCandidate> {
    // (generation_id, prompt_id, spec) triples in, candidates out.
    let mut index: HashMap<(AttributeSlot, String), usize> = HashMap::new();
    for (_, _, spec) in specs {
        for slot in AttributeSlot::ALL {
            if let Some(value) = spec.slot_value(slot) {
                let key = (slot, value.to_string());
                let next = index.len();
                index.entry(key).or_insert(next);
            }
        }
    }
    let dims = index.len().max(1);
    specs
        .iter()
        .map(|(generation_id, prompt_id, spec)| {
            let mut features = vec![0f32; dims];
            for slot in AttributeSlot::ALL {
                if let Some(value) = spec.slot_value(slot) {
                    if let Some(&i) = index.get(&(slot, value.to_string())) {
                        features[i] = 1.0;
                    }
                }
            }
            DppCandidate {
                generation_id: (*generation_id).to_string(),
                prompt_id: (*prompt_id).to_string(),
                quality: 0.0,
                features,
            }
        })
        .collect()
}

/// Cosine similarity of two one-hot vectors.
fn similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut na = 0f64;
    let mut nb = 0f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += f64::from(x * y);
        na += f64::from(x * x);
        nb += f64::from(y * y);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Pick exactly `n` candidates (or all of them when fewer survive).
pub fn select(mut candidates: Vec<DppCandidate>, n: usize, alpha: f64) -> DppSelection {
    // Deterministic processing order regardless of caller ordering.
    candidates.sort_by(|a, b| {
        b.quality
            .partial_cmp(&a.quality)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.generation_id.cmp(&b.generation_id))
    });

    let n = n.min(candidates.len());
    let mut selected: Vec<DppCandidate> = Vec::with_capacity(n);

    while selected.len() < n {
        let mut best: Option<(usize, f64)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s| similarity(&candidate.features, &s.features))
                .fold(0f64, f64::max);
            let objective = alpha * (candidate.quality / 100.0) - (1.0 - alpha) * max_sim;
            match best {
                Some((_, best_objective)) if objective <= best_objective => {}
                _ => best = Some((i, objective)),
            }
        }
        let Some((i, _)) = best else { break };
        selected.push(candidates.remove(i));
    }

    let diversity_score = diversity(&selected);
    DppSelection {
        selected: selected.into_iter().map(|c| c.generation_id).collect(),
        diversity_score,
    }
}

fn diversity(selected: &[DppCandidate]) -> f64 {
    if selected.len() < 2 {
        return if selected.is_empty() { 0.0 } else { 1.0 };
    }
    let mut total = 0f64;
    let mut pairs = 0u32;
    for i in 0..selected.len() {
        for j in (i + 1)..selected.len() {
            total += similarity(&selected[i].features, &selected[j].features);
            pairs += 1;
        }
    }
    (1.0 - total / f64::from(pairs)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(garment: &str, color: &str, background: &str) -> PromptSpec {
        PromptSpec {
            garment: Some(garment.into()),
            color_palette: vec![color.into()],
            background: Some(background.into()),
            ..Default::default()
        }
    }

    fn candidates(entries: &[(&str, f64, &PromptSpec)]) -> Vec<DppCandidate> {
        let triples: Vec<(&str, &str, &PromptSpec)> =
            entries.iter().map(|(id, _, s)| (*id, "prompt", *s)).collect();
        let mut encoded = encode_features(&triples);
        for (candidate, (_, quality, _)) in encoded.iter_mut().zip(entries) {
            candidate.quality = *quality;
        }
        encoded
    }

    #[test]
    fn test_exact_n_degrades_to_quality_sort() {
        let a = spec("blazer", "navy", "seamless studio");
        let b = spec("dress", "cream", "urban street");
        let c = spec("coat", "camel", "interior");
        let pool = candidates(&[("g1", 70.0, &a), ("g2", 90.0, &b), ("g3", 80.0, &c)]);
        let result = select(pool, 3, DPP_ALPHA);
        assert_eq!(result.selected.len(), 3);
        assert_eq!(result.selected[0], "g2");
    }

    #[test]
    fn test_diversity_beats_marginal_quality() {
        // Two near-identical high-quality candidates and one distinct
        // slightly weaker one: the distinct one must make the pair.
        let twin = spec("blazer", "navy", "seamless studio");
        let distinct = spec("dress", "cream", "urban street");
        let pool = candidates(&[
            ("twin-1", 92.0, &twin),
            ("twin-2", 90.0, &twin),
            ("distinct", 80.0, &distinct),
        ]);
        let result = select(pool, 2, DPP_ALPHA);
        assert!(result.selected.contains(&"twin-1".to_string()));
        assert!(result.selected.contains(&"distinct".to_string()));
        assert!(result.diversity_score > 0.5);
    }

    #[test]
    fn test_identical_set_scores_zero_diversity() {
        let same = spec("blazer", "navy", "seamless studio");
        let pool = candidates(&[("g1", 90.0, &same), ("g2", 85.0, &same)]);
        let result = select(pool, 2, DPP_ALPHA);
        assert!(result.diversity_score < 1e-9);
    }

    #[test]
    fn test_fewer_candidates_than_requested() {
        let a = spec("blazer", "navy", "seamless studio");
        let pool = candidates(&[("g1", 90.0, &a)]);
        let result = select(pool, 5, DPP_ALPHA);
        assert_eq!(result.selected, vec!["g1".to_string()]);
        assert!((result.diversity_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let a = spec("blazer", "navy", "seamless studio");
        let b = spec("dress", "cream", "urban street");
        let pool1 = candidates(&[("g1", 80.0, &a), ("g2", 80.0, &b)]);
        let pool2 = candidates(&[("g2", 80.0, &b), ("g1", 80.0, &a)]);
        assert_eq!(select(pool1, 1, DPP_ALPHA).selected, select(pool2, 1, DPP_ALPHA).selected);
    }
}
