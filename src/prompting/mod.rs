//! Prompt construction.
//!
//! Builds a [`PromptSpec`] and its rendered text from the user's style
//! profile, an optional free-text command, a Thompson-Sampling draw per
//! open slot, and the learned RLHF token picks. Rendering itself is
//! deterministic; all randomness lives in the build step and is
//! seedable.

pub mod render;
pub mod specificity;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::bandit::BanditStore;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::rlhf::RlhfStore;
use crate::storage::{CoverageStore, PromptStore};
use crate::types::{AttributeSlot, PromptSpec, Specificity, StyleProfile};

pub use render::{Rendered, DEFAULT_POSE_TOKENS, FRONT_OVERRIDE_POSE, REQUIRED_NEGATIVES};
pub use specificity::{interpret, ParsedCommand};

/// Learned-modifier candidates per RLHF category. The builder owns the
/// token → category mapping; the weight store never infers it.
const LIGHTING_TOKENS: &[&str] = &[
    "softbox glow",
    "golden hour warmth",
    "dramatic shadows",
    "soft diffused light",
    "rim lighting",
];
const COMPOSITION_TOKENS: &[&str] = &[
    "rule of thirds framing",
    "centered composition",
    "generous negative space",
];
const QUALITY_TOKENS: &[&str] = &[
    "ultra detailed",
    "crisp fabric texture",
    "magazine quality",
];
const MOOD_TOKENS: &[&str] = &["confident", "serene", "bold", "effortless"];
const POSE_TOKENS: &[&str] = &[
    "confident stance",
    "hands in pockets",
    "mid-stride walk",
    "profile turn",
];
const EXPLORE_TOKENS: &[&str] = &[
    "unexpected color accent",
    "experimental styling",
    "avant-garde detail",
];

/// Words that never make it into user-modifier tokens.
const COMMAND_STOPWORDS: &[&str] = &[
    "something", "with", "and", "the", "for", "a", "an", "in", "of", "make", "made", "please",
    "want", "like", "style", "look",
];

/// Options for one build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub command: Option<String>,
    /// Swap Thompson draws for coverage-widening exploration picks.
    pub is_exploration: bool,
    /// Seed for deterministic builds (tests, replays).
    pub seed: Option<u64>,
}

/// Build metadata surfaced to callers and projections.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PromptMetadata {
    pub tokens_used: usize,
    pub interpretation: String,
    pub specificity: Specificity,
    pub creativity: f64,
    pub brand_dna_strength: f64,
    pub truncated: bool,
}

/// A built prompt: the spec, both rendered forms, and metadata.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub spec: PromptSpec,
    pub text: String,
    pub negative_text: String,
    pub metadata: PromptMetadata,
}

/// Builds prompt specs from profile + command + learned state.
#[derive(Clone)]
pub struct PromptBuilder {
    config: Arc<EngineConfig>,
    bandit: BanditStore,
    rlhf: RlhfStore,
    coverage: CoverageStore,
    prompts: PromptStore,
}

impl PromptBuilder {
    pub fn new(
        config: Arc<EngineConfig>,
        bandit: BanditStore,
        rlhf: RlhfStore,
        coverage: CoverageStore,
        prompts: PromptStore,
    ) -> Self {
        Self {
            config,
            bandit,
            rlhf,
            coverage,
            prompts,
        }
    }

    /// Build and persist one prompt.
    pub fn build(
        &self,
        user_id: &str,
        profile: &StyleProfile,
        options: &BuildOptions,
    ) -> EngineResult<BuiltPrompt> {
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let parsed = options
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(interpret);
        let specificity = parsed
            .as_ref()
            .map(|p| p.specificity)
            .unwrap_or(Specificity::Low);
        let creativity = specificity.creativity();
        let brand_dna = specificity.brand_dna_strength();

        let mut spec = PromptSpec {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            creativity,
            is_exploration: options.is_exploration,
            cluster_label: profile.aesthetic_themes.first().cloned(),
            ..Default::default()
        };

        // User-set slots; frozen when the command demands respect.
        if let Some(parsed) = &parsed {
            let respect = specificity.respect_user_intent();
            let mut touched = Vec::new();
            if let Some(garment) = &parsed.garment {
                spec.garment = Some(garment.clone());
                touched.push(AttributeSlot::Garment);
            }
            if !parsed.colors.is_empty() {
                spec.color_palette = parsed.colors.clone();
                touched.push(AttributeSlot::Color);
            }
            if let Some(fabric) = &parsed.fabric {
                spec.fabric = Some(fabric.clone());
                touched.push(AttributeSlot::Fabric);
            }
            if let Some(silhouette) = &parsed.silhouette {
                spec.silhouette = Some(silhouette.clone());
                touched.push(AttributeSlot::Silhouette);
            }
            if let Some(finish) = &parsed.finish {
                spec.finish = Some(finish.clone());
                touched.push(AttributeSlot::Finish);
            }
            if !parsed.details.is_empty() {
                spec.details = parsed.details.clone();
                touched.push(AttributeSlot::Details);
            }
            if respect {
                spec.frozen_slots.extend(touched);
            }
        }

        // Bandit fills the open slots.
        let open: Vec<AttributeSlot> = AttributeSlot::ALL
            .into_iter()
            .filter(|slot| spec.slot_value(*slot).is_none())
            .collect();
        let sampled = self.bandit.sample(
            user_id,
            &open,
            Some(profile),
            options.is_exploration,
            &mut rng,
        )?;
        for (slot, value) in sampled {
            // Brand-DNA strength: the profile's dominant value overrides
            // the draw for underspecified slots.
            let value = if !options.is_exploration && rng.gen::<f64>() < brand_dna {
                profile
                    .distribution(slot.as_str())
                    .and_then(|d| d.top())
                    .map(|(top, _)| top.to_string())
                    .unwrap_or(value)
            } else {
                value
            };
            match slot {
                AttributeSlot::Garment => spec.garment = Some(value),
                AttributeSlot::Fabric => spec.fabric = Some(value),
                AttributeSlot::Color => spec.color_palette = vec![value],
                AttributeSlot::Lighting => spec.lighting_type = Some(value),
                AttributeSlot::Camera => spec.camera_angle = Some(value),
                AttributeSlot::Background => spec.background = Some(value),
                AttributeSlot::Silhouette => spec.silhouette = Some(value),
                AttributeSlot::Finish => spec.finish = Some(value),
                AttributeSlot::Details => spec.details = vec![value],
            }
        }

        // Slot weights: defaults, signature boost, then coverage-gap
        // boosts from the last selection round.
        let gaps = self.coverage.active_gaps(user_id)?;
        let gap_boost: HashMap<AttributeSlot, f64> = gaps
            .iter()
            .map(|g| (g.slot, g.recommended_boost.clamp(1.2, 2.0)))
            .collect();
        for slot in AttributeSlot::ALL {
            let mut weight = slot.default_weight();
            if let Some(value) = spec.slot_value(slot) {
                if profile.is_signature(slot.as_str(), value, self.config.signature_threshold) {
                    weight = (weight + 0.2).min(1.0);
                }
            }
            if let Some(boost) = gap_boost.get(&slot) {
                weight = (weight * boost).min(1.0);
            }
            spec.slot_weights.insert(slot, weight);
        }

        // Learned modifiers, one per category the budget can afford.
        let mut rlhf_tokens = Vec::new();
        for (category, candidates) in [
            ("lighting", LIGHTING_TOKENS),
            ("composition", COMPOSITION_TOKENS),
            ("quality", QUALITY_TOKENS),
            ("mood", MOOD_TOKENS),
        ] {
            let candidates: Vec<String> = candidates.iter().map(|s| s.to_string()).collect();
            rlhf_tokens.extend(self.rlhf.select_tokens(
                user_id,
                category,
                &candidates,
                1,
                &mut rng,
            )?);
        }
        // Style category learns over the profile's own themes.
        let style_candidates: Vec<String> = profile
            .aesthetic_themes
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        rlhf_tokens.extend(self.rlhf.select_tokens(
            user_id,
            "style",
            &style_candidates,
            1,
            &mut rng,
        )?);

        spec.modifier_tokens = rlhf_tokens.clone();
        spec.model_pose = self.pose_block(user_id, &mut rng)?;

        let user_tokens = parsed
            .as_ref()
            .map(|p| user_modifier_tokens(p))
            .unwrap_or_default();
        let explore_tokens: Vec<String> = if options.is_exploration || creativity >= 0.8 {
            vec![EXPLORE_TOKENS[rng.gen_range(0..EXPLORE_TOKENS.len())].to_string()]
        } else {
            Vec::new()
        };

        let rendered = render::render(
            render::fragments(&spec, &rlhf_tokens, &user_tokens, &explore_tokens),
            self.config.prompt_max_words,
        );
        spec.truncated = rendered.truncated;

        self.prompts
            .insert(&spec, &rendered.text, &rendered.negative_text)?;
        if !gaps.is_empty() {
            self.coverage.consume_gaps(user_id)?;
        }

        let metadata = PromptMetadata {
            tokens_used: rendered.tokens_used.len(),
            interpretation: interpretation_summary(&parsed, &spec),
            specificity,
            creativity,
            brand_dna_strength: brand_dna,
            truncated: rendered.truncated,
        };

        Ok(BuiltPrompt {
            spec,
            text: rendered.text,
            negative_text: rendered.negative_text,
            metadata,
        })
    }

    /// Required pose block: front-facing defaults plus one learned pose
    /// token. A learned pose implying a non-front angle is overridden.
    fn pose_block(&self, user_id: &str, rng: &mut StdRng) -> EngineResult<Vec<String>> {
        let mut pose: Vec<String> = DEFAULT_POSE_TOKENS.map(String::from).to_vec();
        let candidates: Vec<String> = POSE_TOKENS.iter().map(|s| s.to_string()).collect();
        let picks = self
            .rlhf
            .select_tokens(user_id, "modelPose", &candidates, 1, rng)?;
        if let Some(pick) = picks.into_iter().next() {
            let lower = pick.to_lowercase();
            if lower.contains("profile") || lower.contains("side") || lower.contains("back") {
                pose.push(FRONT_OVERRIDE_POSE.to_string());
            } else {
                pose.push(format!("({pick}:1.1)"));
            }
        }
        Ok(pose)
    }
}

/// Category for a token the builder itself emitted, by membership in
/// the candidate lists. The builder owns the token → category mapping;
/// slot values (garments, fabrics…) have no category and return None.
pub fn token_category(token: &str) -> Option<&'static str> {
    let bare = strip_weight_syntax(token);
    let matches = |list: &[&str]| list.iter().any(|t| *t == bare);
    if matches(LIGHTING_TOKENS) {
        Some("lighting")
    } else if matches(COMPOSITION_TOKENS) {
        Some("composition")
    } else if matches(QUALITY_TOKENS) {
        Some("quality")
    } else if matches(MOOD_TOKENS) {
        Some("mood")
    } else if matches(POSE_TOKENS) {
        Some("modelPose")
    } else {
        None
    }
}

/// Category for free text from a critique. Total: anything that does
/// not read as lighting or pose lands in `style`.
pub fn categorize_free_token(token: &str) -> &'static str {
    let lower = token.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if any(&["light", "glow", "shadow", "bright", "dark", "backlit"]) {
        "lighting"
    } else if any(&["pose", "stance", "facing", "angle", "walk", "standing"]) {
        "modelPose"
    } else if any(&["frame", "framing", "crop", "composition", "centered"]) {
        "composition"
    } else if any(&["sharp", "detail", "quality", "resolution", "crisp"]) {
        "quality"
    } else if any(&["mood", "confident", "serene", "bold", "soft", "moody"]) {
        "mood"
    } else {
        "style"
    }
}

/// Strip `(token:1.2)`-style weight syntax down to the bare token.
pub fn strip_weight_syntax(token: &str) -> String {
    let t = token.trim();
    let t = t.strip_prefix('(').unwrap_or(t);
    let t = t.strip_suffix(')').unwrap_or(t);
    match t.rsplit_once(':') {
        Some((head, tail)) if tail.parse::<f64>().is_ok() => head.to_string(),
        _ => t.to_string(),
    }
}

/// Leftover descriptive words from the command, as one modest token.
fn user_modifier_tokens(parsed: &ParsedCommand) -> Vec<String> {
    let consumed: HashSet<String> = parsed
        .garment
        .iter()
        .chain(parsed.fabric.iter())
        .chain(parsed.silhouette.iter())
        .chain(parsed.finish.iter())
        .chain(parsed.colors.iter())
        .chain(parsed.details.iter())
        .flat_map(|v| v.split_whitespace())
        .map(|w| w.to_lowercase())
        .collect();

    let leftovers: Vec<String> = parsed
        .raw
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() > 3)
        .filter(|w| !COMMAND_STOPWORDS.contains(&w.as_str()))
        .filter(|w| !consumed.contains(w))
        .take(4)
        .collect();

    if leftovers.is_empty() {
        Vec::new()
    } else {
        vec![leftovers.join(" ")]
    }
}

fn interpretation_summary(parsed: &Option<ParsedCommand>, spec: &PromptSpec) -> String {
    match parsed {
        Some(parsed) => {
            let frozen: Vec<&str> = {
                let mut slots: Vec<&str> =
                    spec.frozen_slots.iter().map(|s| s.as_str()).collect();
                slots.sort();
                slots
            };
            if frozen.is_empty() {
                format!(
                    "{} command, {} concrete attributes, bandit fills all slots",
                    parsed.specificity.as_str(),
                    parsed.attribute_count()
                )
            } else {
                format!(
                    "{} command, frozen slots: {}",
                    parsed.specificity.as_str(),
                    frozen.join(", ")
                )
            }
        }
        None => "no command, profile-driven generation".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;
    use crate::storage::{BanditStateStore, RlhfWeightStore};

    fn builder() -> (tempfile::TempDir, PromptBuilder) {
        let (dir, db) = temp_db();
        let config = Arc::new(EngineConfig::default());
        let builder = PromptBuilder::new(
            config.clone(),
            BanditStore::new(BanditStateStore::new(db.clone()), config.bandit_floor),
            RlhfStore::new(
                RlhfWeightStore::new(db.clone()),
                config.rlhf_learning_rate,
                config.rlhf_epsilon,
            ),
            CoverageStore::new(db.clone()),
            PromptStore::new(db),
        );
        (dir, builder)
    }

    fn profile() -> StyleProfile {
        let mut p = StyleProfile {
            user_id: "u1".into(),
            portfolio_id: "p1".into(),
            total_images: 5,
            aesthetic_themes: vec!["Tailored".into(), "Minimalist".into()],
            ..Default::default()
        };
        for _ in 0..4 {
            p.garments.add("blazer");
            p.colors.add("navy");
            p.fabrics.add("wool suiting");
        }
        p.garments.add("dress");
        p.colors.add("cream");
        p.fabrics.add("silk charmeuse");
        p.lighting.add("studio lighting");
        p.camera.add("eye level");
        // Three backgrounds at equal frequency so none clears the
        // signature threshold.
        p.backgrounds.add("seamless studio");
        p.backgrounds.add("urban street");
        p.backgrounds.add("interior");
        p
    }

    #[test]
    fn test_high_specificity_freezes_user_slots() {
        let (_dir, builder) = builder();
        let built = builder
            .build(
                "u1",
                &profile(),
                &BuildOptions {
                    command: Some("navy wool double-breasted blazer with peak lapels".into()),
                    seed: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(built.metadata.specificity, Specificity::High);
        assert!((built.metadata.creativity - 0.2).abs() < 1e-9);
        for slot in [
            AttributeSlot::Garment,
            AttributeSlot::Color,
            AttributeSlot::Fabric,
            AttributeSlot::Details,
        ] {
            assert!(built.spec.frozen_slots.contains(&slot), "{slot} not frozen");
        }
        // User attributes appear verbatim in the rendered text.
        assert!(built.text.contains("blazer"));
        assert!(built.text.contains("navy"));
        assert!(built.text.contains("wool suiting"));
        assert!(built.text.contains("peak lapel"));
        // Bandit still filled the open photography slots.
        assert!(built.spec.lighting_type.is_some());
        assert!(built.spec.camera_angle.is_some());
        assert!(built.spec.background.is_some());
    }

    #[test]
    fn test_low_specificity_reflects_profile() {
        let (_dir, builder) = builder();
        let built = builder
            .build(
                "u1",
                &profile(),
                &BuildOptions {
                    command: Some("something elegant".into()),
                    seed: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(built.metadata.specificity, Specificity::Low);
        assert!((built.metadata.creativity - 0.8).abs() < 1e-9);
        assert!(built.spec.frozen_slots.is_empty());
        // Every slot was filled from the profile-constrained universe.
        assert!(built.spec.garment.is_some());
        assert!(built.spec.fabric.is_some());
        // The cluster prefix reflects the top theme.
        assert!(built.text.contains("in the user's signature 'Tailored' mode:"));
    }

    #[test]
    fn test_word_budget_and_pose_invariants() {
        let (_dir, builder) = builder();
        for seed in 0..10 {
            let built = builder
                .build(
                    "u1",
                    &profile(),
                    &BuildOptions {
                        seed: Some(seed),
                        ..Default::default()
                    },
                )
                .unwrap();
            assert!(render::word_count(&built.text) <= 50, "over budget: {}", built.text);
            assert!(built.text.contains("(three-quarter length shot:1.3)"));
            assert!(built.text.contains("(model facing camera:1.3)"));
            for banned in REQUIRED_NEGATIVES {
                assert!(!built.text.contains(banned));
                assert!(built.negative_text.contains(banned));
            }
        }
    }

    #[test]
    fn test_gap_boost_applied_and_consumed() {
        let (_dir, builder) = builder();
        builder
            .coverage
            .record(
                "u1",
                &crate::selection::coverage::CoverageReport {
                    selected_ids: vec![],
                    per_slot_coverage: HashMap::from([("background".to_string(), 0.4)]),
                    diversity_score: 0.5,
                    gaps: vec![crate::selection::coverage::AttributeGap {
                        slot: AttributeSlot::Background,
                        uncovered_values: vec!["seamless studio".into()],
                        severity: 0.6,
                        recommended_boost: 1.5,
                    }],
                },
            )
            .unwrap();

        let built = builder
            .build("u1", &profile(), &BuildOptions { seed: Some(3), ..Default::default() })
            .unwrap();
        // 0.5 default × 1.5 boost = 0.75 → parenthesis bracket tier.
        let weight = built.spec.weight(AttributeSlot::Background);
        assert!((weight - 0.75).abs() < 1e-9);
        // Gaps are one-shot.
        assert!(builder.coverage.active_gaps("u1").unwrap().is_empty());
        let next = builder
            .build("u1", &profile(), &BuildOptions { seed: Some(4), ..Default::default() })
            .unwrap();
        assert!((next.spec.weight(AttributeSlot::Background) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_prompt_persisted() {
        let (_dir, builder) = builder();
        let built = builder
            .build("u1", &profile(), &BuildOptions { seed: Some(5), ..Default::default() })
            .unwrap();
        let stored = builder.prompts.get(&built.spec.id).unwrap().unwrap();
        assert_eq!(stored.text, built.text);
        assert_eq!(stored.spec.user_id, "u1");
    }

    #[test]
    fn test_signature_slot_weight_boost() {
        let (_dir, builder) = builder();
        // navy is 4/5 of colors: a signature under the 0.4 threshold.
        let built = builder
            .build(
                "u1",
                &profile(),
                &BuildOptions {
                    command: Some("exactly a navy quilted vest".into()),
                    seed: Some(6),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(built.spec.color_palette, vec!["navy".to_string()]);
        // 0.7 default + 0.2 signature boost.
        assert!((built.spec.weight(AttributeSlot::Color) - 0.9).abs() < 1e-9);
    }
}
