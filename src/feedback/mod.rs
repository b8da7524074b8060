//! Feedback processing.
//!
//! Explicit signals (likes, saves, deletes, critiques) and implicit
//! ones (impressions, swipes) are applied to the bandit posteriors and
//! the RLHF token weights. Events are idempotent by id, serialized per
//! user, and never allowed to block or fail the serving path.

pub mod critique;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::bandit::BanditStore;
use crate::error::{EngineError, EngineResult};
use crate::prompting::{categorize_free_token, strip_weight_syntax, token_category};
use crate::rlhf::RlhfStore;
use crate::storage::{FeedbackLogStore, GenerationStore, PromptStore};
use crate::types::{AttributeSlot, FeedbackEvent, FeedbackKind};

pub use critique::{CritiqueDeltas, CritiqueParser};

/// Impression dwell time that earns the full implicit reward.
const IMPRESSION_CAP_MS: u64 = 10_000;

/// Maximum implicit reward from one impression.
const IMPRESSION_MAX_REWARD: f64 = 0.3;

/// Rewards applied to critique add/remove deltas.
const CRITIQUE_ADD_REWARD: f64 = 1.0;
const CRITIQUE_REMOVE_REWARD: f64 = -1.0;

/// Bandit reward for a critique slot override.
const CRITIQUE_SLOT_REWARD: f64 = 0.3;

/// What one processed event did.
#[derive(Debug, Clone, Default)]
pub struct FeedbackOutcome {
    /// False when the event id was a replay and nothing changed.
    pub applied: bool,
    pub rlhf_updates: usize,
    pub bandit_updates: usize,
}

/// Applies feedback events to the learning stores.
#[derive(Clone)]
pub struct FeedbackProcessor {
    log: FeedbackLogStore,
    generations: GenerationStore,
    prompts: PromptStore,
    bandit: BanditStore,
    rlhf: RlhfStore,
    critique_parser: CritiqueParser,
    /// Per-user locks: one user's events apply in arrival order.
    user_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FeedbackProcessor {
    pub fn new(
        log: FeedbackLogStore,
        generations: GenerationStore,
        prompts: PromptStore,
        bandit: BanditStore,
        rlhf: RlhfStore,
        critique_parser: CritiqueParser,
    ) -> Self {
        Self {
            log,
            generations,
            prompts,
            bandit,
            rlhf,
            critique_parser,
            user_locks: Arc::new(DashMap::new()),
        }
    }

    /// Apply one event. Replays are accepted and ignored; foreign
    /// generations are rejected.
    pub async fn process(&self, event: &FeedbackEvent) -> EngineResult<FeedbackOutcome> {
        let lock = self
            .user_locks
            .entry(event.user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Ownership check before anything is recorded.
        let generation = self
            .generations
            .get_owned(&event.generation_id, &event.user_id)?;

        if !self.log.record(event)? {
            tracing::debug!(event_id = %event.event_id, "replayed feedback event ignored");
            return Ok(FeedbackOutcome::default());
        }

        let Some(stored) = self.prompts.get(&generation.prompt_id)? else {
            // Prompt rows are weak references; a missing one means the
            // event is recorded but unlearnable.
            tracing::warn!(prompt_id = %generation.prompt_id, "feedback for unknown prompt");
            return Ok(FeedbackOutcome {
                applied: true,
                ..Default::default()
            });
        };
        let spec = stored.spec;

        let mut outcome = FeedbackOutcome {
            applied: true,
            ..Default::default()
        };

        if event.kind == FeedbackKind::Critique {
            self.apply_critique(event, &mut outcome).await?;
            return Ok(outcome);
        }

        let (rlhf_reward, bandit_reward) = rewards_for(event);

        if rlhf_reward != 0.0 {
            for token in spec
                .modifier_tokens
                .iter()
                .chain(spec.model_pose.iter())
            {
                let bare = strip_weight_syntax(token);
                let Some(category) = token_category(&bare) else {
                    continue;
                };
                self.rlhf.apply_reward(
                    &event.event_id,
                    &event.user_id,
                    category,
                    &bare,
                    rlhf_reward,
                )?;
                outcome.rlhf_updates += 1;
            }
        }

        if bandit_reward != 0.0 {
            for slot in AttributeSlot::ALL {
                // Frozen slots were user-dictated, not bandit choices;
                // they earn no posterior credit.
                if spec.frozen_slots.contains(&slot) {
                    continue;
                }
                let Some(value) = spec.slot_value(slot) else {
                    continue;
                };
                self.bandit
                    .update(&event.user_id, slot, value, bandit_reward)?;
                outcome.bandit_updates += 1;
            }
        }

        Ok(outcome)
    }

    async fn apply_critique(
        &self,
        event: &FeedbackEvent,
        outcome: &mut FeedbackOutcome,
    ) -> EngineResult<()> {
        let Some(text) = event.critique_text() else {
            return Err(EngineError::validation("critique event without text"));
        };
        let deltas = match self.critique_parser.parse(text).await {
            Ok(deltas) => deltas,
            Err(e) => {
                // Critique parsing is best-effort; the event stays
                // recorded for a later replay with a healthier parser.
                tracing::warn!(error = %e, "critique parse failed");
                return Ok(());
            }
        };

        for token in &deltas.add {
            let category = categorize_free_token(token);
            self.rlhf.apply_reward(
                &event.event_id,
                &event.user_id,
                category,
                token,
                CRITIQUE_ADD_REWARD,
            )?;
            outcome.rlhf_updates += 1;
        }
        for token in &deltas.remove {
            let category = categorize_free_token(token);
            self.rlhf.apply_reward(
                &event.event_id,
                &event.user_id,
                category,
                token,
                CRITIQUE_REMOVE_REWARD,
            )?;
            outcome.rlhf_updates += 1;
        }
        for (slot, value) in &deltas.slot_overrides {
            let Some(slot) = AttributeSlot::parse(slot) else {
                continue;
            };
            self.bandit
                .update(&event.user_id, slot, value, CRITIQUE_SLOT_REWARD)?;
            outcome.bandit_updates += 1;
        }
        Ok(())
    }
}

/// (RLHF reward, bandit reward) for one event.
fn rewards_for(event: &FeedbackEvent) -> (f64, f64) {
    match event.kind {
        FeedbackKind::Like | FeedbackKind::Save => (1.0, 0.1),
        FeedbackKind::Share => (1.2, 0.15),
        FeedbackKind::GenerateSimilar => (1.5, 0.3),
        FeedbackKind::Dislike => (-0.5, -0.1),
        FeedbackKind::Delete => (-1.0, -0.2),
        FeedbackKind::ImpressionMs => {
            let ms = event.impression_ms().unwrap_or(0).min(IMPRESSION_CAP_MS);
            let reward = ms as f64 / IMPRESSION_CAP_MS as f64 * IMPRESSION_MAX_REWARD;
            (reward, 0.0)
        }
        FeedbackKind::Swipe => {
            let right = event
                .payload
                .as_str()
                .map(|s| s.eq_ignore_ascii_case("right"))
                .unwrap_or(false);
            if right {
                (0.3, 0.05)
            } else {
                (-0.3, -0.05)
            }
        }
        FeedbackKind::Critique => (0.0, 0.0),
    }
}
