//! Thompson-Sampling bandit over prompt-attribute slots.
//!
//! For every (user, slot, value) the system can choose, a Beta(α, β)
//! posterior is kept in `bandit_state`. Prompt construction draws one
//! sample per candidate and takes the argmax. Exploration falls out of
//! posterior width while α+β is small, exploitation as it grows.

use std::collections::HashMap;

use rand::Rng;
use rand_distr::{Beta, Distribution};

use crate::error::EngineResult;
use crate::storage::bandit_state::{BanditArmRow, BanditStateStore};
use crate::types::{AttributeSlot, StyleProfile};

/// Fallback candidate values per slot, used when the user has no
/// profile distribution for it yet. Keeps `sample` total on day one.
fn default_candidates(slot: AttributeSlot) -> Vec<String> {
    use crate::taxonomy::{Taxonomy, VocabSlot};
    let t = Taxonomy::global();
    let from_vocab = |vs: VocabSlot, n: usize| -> Vec<String> {
        t.values(vs).iter().take(n).cloned().collect()
    };
    match slot {
        AttributeSlot::Garment => from_vocab(VocabSlot::Garment, 12),
        AttributeSlot::Fabric => from_vocab(VocabSlot::Fabric, 12),
        AttributeSlot::Silhouette => from_vocab(VocabSlot::Silhouette, 8),
        AttributeSlot::Finish => from_vocab(VocabSlot::Finish, 6),
        AttributeSlot::Lighting => from_vocab(VocabSlot::LightingType, 8),
        AttributeSlot::Camera => from_vocab(VocabSlot::CameraAngle, 6),
        AttributeSlot::Background => from_vocab(VocabSlot::Background, 7),
        AttributeSlot::Color => [
            "black", "white", "navy", "cream", "camel", "grey", "olive", "burgundy",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        AttributeSlot::Details => [
            "topstitching",
            "patch pockets",
            "ribbed cuffs",
            "quilting",
            "double-breasted closure",
            "raw hem",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
}

/// Per-user Thompson-Sampling state over attribute slots.
#[derive(Clone)]
pub struct BanditStore {
    state: BanditStateStore,
    floor: f64,
}

impl BanditStore {
    pub fn new(state: BanditStateStore, floor: f64) -> Self {
        Self {
            state,
            floor: floor.max(1.0),
        }
    }

    /// Candidate values for a slot: the profile's observed distribution
    /// where one exists, taxonomy defaults otherwise.
    fn candidates(&self, slot: AttributeSlot, profile: Option<&StyleProfile>) -> Vec<String> {
        if let Some(profile) = profile {
            if let Some(dist) = profile.distribution(slot.as_str()) {
                let observed: Vec<String> = dist
                    .ranked()
                    .into_iter()
                    .filter(|(v, _)| crate::types::Descriptor::is_informative(v))
                    .map(|(v, _)| v.to_string())
                    .collect();
                if !observed.is_empty() {
                    return observed;
                }
            }
        }
        default_candidates(slot)
    }

    /// Draw one value per requested slot.
    ///
    /// `exploration` swaps the Thompson draw for a uniform pick among
    /// the bottom quartile by visit count, widening coverage.
    pub fn sample<R: Rng>(
        &self,
        user_id: &str,
        slots: &[AttributeSlot],
        profile: Option<&StyleProfile>,
        exploration: bool,
        rng: &mut R,
    ) -> EngineResult<HashMap<AttributeSlot, String>> {
        let mut choices = HashMap::new();
        for &slot in slots {
            let candidates = self.candidates(slot, profile);
            if candidates.is_empty() {
                continue;
            }
            for value in &candidates {
                self.state
                    .ensure_arm(user_id, slot.as_str(), value, self.floor)?;
            }
            let arms = self.state.arms_for_slot(user_id, slot.as_str())?;
            // Restrict to the current candidate set; stale arms from an
            // older profile stay persisted but are not drawn.
            let arms: Vec<&BanditArmRow> = arms
                .iter()
                .filter(|a| candidates.iter().any(|c| c == &a.value))
                .collect();
            if arms.is_empty() {
                continue;
            }
            let chosen = if exploration {
                pick_bottom_quartile(&arms, rng)
            } else {
                thompson_pick(&arms, rng)
            };
            self.state.record_pull(user_id, slot.as_str(), &chosen)?;
            choices.insert(slot, chosen);
        }
        Ok(choices)
    }

    /// Apply a reward to one arm: positive raises α, negative raises β.
    pub fn update(
        &self,
        user_id: &str,
        slot: AttributeSlot,
        value: &str,
        reward: f64,
    ) -> EngineResult<()> {
        if reward == 0.0 || !reward.is_finite() {
            return Ok(());
        }
        self.state
            .apply_reward(user_id, slot.as_str(), value, reward, self.floor)
    }

    /// Full posterior state for inspection and analytics.
    pub fn snapshot(&self, user_id: &str) -> EngineResult<Vec<BanditArmRow>> {
        self.state.all_arms(user_id)
    }
}

/// Argmax over one Beta draw per arm.
fn thompson_pick<R: Rng>(arms: &[&BanditArmRow], rng: &mut R) -> String {
    let mut best: Option<(&BanditArmRow, f64)> = None;
    for arm in arms {
        let draw = match Beta::new(arm.alpha, arm.beta) {
            Ok(beta) => beta.sample(rng),
            // alpha/beta are floored at 1 so this only fires on NaN
            // poisoning; fall back to the posterior mean.
            Err(_) => arm.alpha / (arm.alpha + arm.beta),
        };
        match best {
            Some((_, best_draw)) if draw <= best_draw => {}
            _ => best = Some((arm, draw)),
        }
    }
    best.map(|(arm, _)| arm.value.clone()).unwrap_or_default()
}

/// Uniform pick among the least-visited quartile.
fn pick_bottom_quartile<R: Rng>(arms: &[&BanditArmRow], rng: &mut R) -> String {
    let mut sorted: Vec<&&BanditArmRow> = arms.iter().collect();
    sorted.sort_by(|a, b| a.pulls.cmp(&b.pulls).then_with(|| a.value.cmp(&b.value)));
    let quartile = (sorted.len() + 3) / 4;
    let pool = &sorted[..quartile.max(1)];
    pool[rng.gen_range(0..pool.len())].value.clone()
}
