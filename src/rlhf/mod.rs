//! Token-level RLHF weights.
//!
//! Per (user, category, token) scalar weights in [0, 2], default 1,
//! moved by an exponential moving average toward each observed reward.
//! Selection is ε-greedy: mostly the top-weighted tokens, occasionally
//! a uniform draw to keep tail tokens alive.

use rand::Rng;

use crate::error::{EngineError, EngineResult};
use crate::storage::rlhf_weights::{RlhfWeightStore, TokenWeightRow};

/// The categories the prompt builder maps tokens into. The store never
/// infers categorization; unknown categories are rejected.
pub const CATEGORIES: &[&str] = &[
    "lighting",
    "composition",
    "style",
    "quality",
    "mood",
    "modelPose",
];

/// Default weight for a token never seen before.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Weight bounds.
pub const WEIGHT_MIN: f64 = 0.0;
pub const WEIGHT_MAX: f64 = 2.0;

/// Per-user learned token weights with ε-greedy selection.
#[derive(Clone)]
pub struct RlhfStore {
    store: RlhfWeightStore,
    learning_rate: f64,
    epsilon: f64,
}

impl RlhfStore {
    pub fn new(store: RlhfWeightStore, learning_rate: f64, epsilon: f64) -> Self {
        Self {
            store,
            learning_rate,
            epsilon,
        }
    }

    fn check_category(category: &str) -> EngineResult<()> {
        if CATEGORIES.contains(&category) {
            Ok(())
        } else {
            Err(EngineError::validation(format!(
                "unknown RLHF category: {category}"
            )))
        }
    }

    /// Pick up to `count` tokens for a category from `candidates`.
    ///
    /// With probability 1−ε the top-weighted candidates win; otherwise
    /// the picks are uniform. Candidates keep their learned weight when
    /// one exists and start at [`DEFAULT_WEIGHT`] otherwise.
    pub fn select_tokens<R: Rng>(
        &self,
        user_id: &str,
        category: &str,
        candidates: &[String],
        count: usize,
        rng: &mut R,
    ) -> EngineResult<Vec<String>> {
        Self::check_category(category)?;
        if candidates.is_empty() || count == 0 {
            return Ok(Vec::new());
        }
        let learned = self.store.weights_for_category(user_id, category)?;
        let weight_of = |token: &str| -> f64 {
            learned
                .iter()
                .find(|w| w.token == token)
                .map(|w| w.weight)
                .unwrap_or(DEFAULT_WEIGHT)
        };

        let mut pool: Vec<(String, f64)> = candidates
            .iter()
            .map(|t| (t.clone(), weight_of(t)))
            .collect();

        if rng.gen::<f64>() < self.epsilon {
            // Exploration: uniform shuffle-pick.
            let mut picks = Vec::new();
            while picks.len() < count && !pool.is_empty() {
                let i = rng.gen_range(0..pool.len());
                picks.push(pool.swap_remove(i).0);
            }
            return Ok(picks);
        }

        pool.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(pool.into_iter().take(count).map(|(t, _)| t).collect())
    }

    /// EMA update, clipped to the weight bounds. Rewards are expressed
    /// relative to the neutral weight: the weight moves toward
    /// `1 + reward`, so a +1.0 signal pulls an untouched token to 1.1
    /// after one step and a −1.0 signal pulls it to 0.9. Returns the
    /// new weight.
    pub fn apply_reward(
        &self,
        event_id: &str,
        user_id: &str,
        category: &str,
        token: &str,
        reward: f64,
    ) -> EngineResult<f64> {
        Self::check_category(category)?;
        if !reward.is_finite() {
            return Err(EngineError::validation("non-finite RLHF reward"));
        }
        let target = (DEFAULT_WEIGHT + reward).clamp(WEIGHT_MIN, WEIGHT_MAX);
        let before = self
            .store
            .get(user_id, category, token)?
            .unwrap_or(DEFAULT_WEIGHT);
        let after = (before + self.learning_rate * (target - before))
            .clamp(WEIGHT_MIN, WEIGHT_MAX);
        self.store
            .set_weight(event_id, user_id, category, token, reward, before, after)?;
        Ok(after)
    }

    /// All learned weights for a user, grouped by category in the row
    /// ordering.
    pub fn weights(&self, user_id: &str) -> EngineResult<Vec<TokenWeightRow>> {
        self.store.all_weights(user_id)
    }

    /// Learned weights for one category, best first.
    pub fn weights_for_category(
        &self,
        user_id: &str,
        category: &str,
    ) -> EngineResult<Vec<TokenWeightRow>> {
        Self::check_category(category)?;
        self.store.weights_for_category(user_id, category)
    }
}
