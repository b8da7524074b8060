//! Weighted prompt rendering.
//!
//! Assembly order is fixed: cluster prefix → garment → fabric → finish →
//! color → model/pose → lighting → camera → background → details →
//! quality trailer. Slot weight decides bracket syntax; a hard word
//! budget truncates lowest-priority fragments first.

use crate::types::{AttributeSlot, PromptSpec};

/// Default pose tokens, always present when no learned pose overrides.
pub const DEFAULT_POSE_TOKENS: [&str; 3] = [
    "(three-quarter length shot:1.3)",
    "(model facing camera:1.3)",
    "(front-facing pose:1.2)",
];

/// Replacement when a learned pose implies a non-front angle.
pub const FRONT_OVERRIDE_POSE: &str = "(3/4 front angle:1.2)";

/// Mandatory negative-prompt entries.
pub const REQUIRED_NEGATIVES: [&str; 3] = ["back view", "rear view", "turned away"];

/// Baseline negatives every prompt carries in addition to the required
/// pose negatives.
const QUALITY_NEGATIVES: [&str; 4] = ["blurry", "low quality", "deformed hands", "watermark"];

/// Trailer appended after all slots.
const QUALITY_TRAILER: &str = "(professional fashion photography:1.1), sharp focus";

/// Budget shares by fragment class when truncation is needed.
const SHARE_CORE: f64 = 0.60;
const SHARE_RLHF: f64 = 0.25;
const SHARE_USER: f64 = 0.10;
const SHARE_EXPLORE: f64 = 0.05;

/// Which budget bucket a fragment draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentClass {
    /// Slot values, pose block, quality trailer.
    Core,
    /// Learned modifier tokens.
    Rlhf,
    /// Tokens the user's command contributed beyond slot values.
    User,
    /// Exploration extras.
    Explore,
}

/// One renderable piece of the prompt, already in assembly order.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub text: String,
    pub class: FragmentClass,
}

/// Output of rendering.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub text: String,
    pub negative_text: String,
    /// Final token fragments, post-truncation.
    pub tokens_used: Vec<String>,
    pub truncated: bool,
}

/// Apply the bracket syntax for a slot weight: `[text]` above 0.8,
/// `(text)` above 0.5, bare otherwise.
pub fn bracket(text: &str, weight: f64) -> String {
    if weight > 0.8 {
        format!("[{text}]")
    } else if weight > 0.5 {
        format!("({text})")
    } else {
        text.to_string()
    }
}

/// Assemble the ordered fragment list for a spec plus its learned and
/// exploratory extras.
pub fn fragments(
    spec: &PromptSpec,
    rlhf_tokens: &[String],
    user_tokens: &[String],
    explore_tokens: &[String],
) -> Vec<Fragment> {
    let mut out = Vec::new();
    let mut core = |text: String| {
        out.push(Fragment {
            text,
            class: FragmentClass::Core,
        })
    };

    if let Some(cluster) = &spec.cluster_label {
        // Context-setter: full weight, no brackets.
        core(format!("in the user's signature '{cluster}' mode:"));
    }
    if let Some(garment) = &spec.garment {
        let mut text = garment.clone();
        if let Some(silhouette) = &spec.silhouette {
            text = format!("{silhouette} {text}");
        }
        core(bracket(&text, spec.weight(AttributeSlot::Garment)));
    }
    if let Some(fabric) = &spec.fabric {
        core(bracket(fabric, spec.weight(AttributeSlot::Fabric)));
    }
    if let Some(finish) = &spec.finish {
        core(bracket(
            &format!("{finish} finish"),
            spec.weight(AttributeSlot::Finish),
        ));
    }
    if !spec.color_palette.is_empty() {
        core(bracket(
            &spec.color_palette.join(" and "),
            spec.weight(AttributeSlot::Color),
        ));
    }

    // Model/pose block is required.
    let pose = if spec.model_pose.is_empty() {
        DEFAULT_POSE_TOKENS.map(String::from).to_vec()
    } else {
        spec.model_pose.clone()
    };
    core(pose.join(", "));

    if let Some(lighting) = &spec.lighting_type {
        let mut text = lighting.clone();
        if let Some(direction) = &spec.lighting_direction {
            text = format!("{text} from {direction}");
        }
        core(bracket(&text, spec.weight(AttributeSlot::Lighting)));
    }
    if let Some(angle) = &spec.camera_angle {
        let mut text = angle.clone();
        if let Some(height) = &spec.camera_height {
            text = format!("{text}, {height}");
        }
        core(bracket(&text, spec.weight(AttributeSlot::Camera)));
    }
    if let Some(background) = &spec.background {
        core(bracket(
            &format!("{background} background"),
            spec.weight(AttributeSlot::Background),
        ));
    }
    if !spec.details.is_empty() {
        core(bracket(
            &spec.details.join(", "),
            spec.weight(AttributeSlot::Details),
        ));
    }

    for token in rlhf_tokens {
        out.push(Fragment {
            text: token.clone(),
            class: FragmentClass::Rlhf,
        });
    }
    for token in user_tokens {
        out.push(Fragment {
            text: token.clone(),
            class: FragmentClass::User,
        });
    }
    for token in explore_tokens {
        out.push(Fragment {
            text: token.clone(),
            class: FragmentClass::Explore,
        });
    }

    out.push(Fragment {
        text: QUALITY_TRAILER.to_string(),
        class: FragmentClass::Core,
    });
    out
}

/// Render fragments into final text under the hard word budget.
pub fn render(fragments: Vec<Fragment>, max_words: usize) -> Rendered {
    let total_words: usize = fragments.iter().map(|f| word_count(&f.text)).sum();
    let (kept, truncated) = if total_words <= max_words {
        (fragments, false)
    } else {
        truncate(fragments, max_words)
    };

    let tokens_used: Vec<String> = kept.iter().map(|f| f.text.clone()).collect();
    let text = tokens_used.join(", ");

    let mut negatives: Vec<&str> = REQUIRED_NEGATIVES.to_vec();
    negatives.extend(QUALITY_NEGATIVES);

    Rendered {
        text,
        negative_text: negatives.join(", "),
        tokens_used,
        truncated,
    }
}

/// Per-class budget truncation: every class gets its share, core first.
/// Slack left by a light class flows to the next in priority order.
fn truncate(fragments: Vec<Fragment>, max_words: usize) -> (Vec<Fragment>, bool) {
    let budget_for = |share: f64| ((max_words as f64) * share).floor() as usize;
    let mut budgets = [
        (FragmentClass::Core, budget_for(SHARE_CORE)),
        (FragmentClass::Rlhf, budget_for(SHARE_RLHF)),
        (FragmentClass::User, budget_for(SHARE_USER)),
        (FragmentClass::Explore, budget_for(SHARE_EXPLORE)),
    ];

    // First pass: spend each class budget in assembly order.
    let mut kept_flags = vec![false; fragments.len()];
    for (class, budget) in budgets.iter_mut() {
        let mut remaining = *budget;
        for (i, fragment) in fragments.iter().enumerate() {
            if fragment.class != *class {
                continue;
            }
            let words = word_count(&fragment.text);
            if words <= remaining {
                kept_flags[i] = true;
                remaining -= words;
            }
        }
        *budget = remaining;
    }

    // Second pass: pour unspent slack back, highest priority first.
    let mut slack: usize = budgets.iter().map(|(_, b)| *b).sum();
    for class in [
        FragmentClass::Core,
        FragmentClass::Rlhf,
        FragmentClass::User,
        FragmentClass::Explore,
    ] {
        for (i, fragment) in fragments.iter().enumerate() {
            if kept_flags[i] || fragment.class != class {
                continue;
            }
            let words = word_count(&fragment.text);
            if words <= slack {
                kept_flags[i] = true;
                slack -= words;
            }
        }
    }

    let kept: Vec<Fragment> = fragments
        .into_iter()
        .zip(kept_flags)
        .filter_map(|(f, keep)| keep.then_some(f))
        .collect();
    (kept, true)
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spec() -> PromptSpec {
        PromptSpec {
            id: "p1".into(),
            user_id: "u1".into(),
            garment: Some("blazer".into()),
            silhouette: Some("tailored".into()),
            color_palette: vec!["navy".into()],
            fabric: Some("wool suiting".into()),
            finish: Some("matte".into()),
            lighting_type: Some("studio lighting".into()),
            lighting_direction: Some("front".into()),
            camera_angle: Some("eye level".into()),
            camera_height: Some("three-quarter length".into()),
            background: Some("seamless studio".into()),
            details: vec!["notched lapel".into()],
            cluster_label: Some("Tailored".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_fixed_assembly_order() {
        let rendered = render(fragments(&spec(), &[], &[], &[]), 100);
        let text = &rendered.text;
        let pos = |needle: &str| text.find(needle).unwrap_or_else(|| panic!("missing {needle}"));
        assert!(pos("signature 'Tailored' mode") < pos("blazer"));
        assert!(pos("blazer") < pos("wool suiting"));
        assert!(pos("wool suiting") < pos("matte finish"));
        assert!(pos("matte finish") < pos("navy"));
        assert!(pos("navy") < pos("model facing camera"));
        assert!(pos("model facing camera") < pos("studio lighting"));
        assert!(pos("studio lighting") < pos("eye level"));
        assert!(pos("eye level") < pos("seamless studio background"));
        assert!(pos("seamless studio background") < pos("notched lapel"));
        assert!(pos("notched lapel") < pos("professional fashion photography"));
    }

    #[test]
    fn test_bracket_syntax_by_weight() {
        assert_eq!(bracket("x", 0.9), "[x]");
        assert_eq!(bracket("x", 0.7), "(x)");
        assert_eq!(bracket("x", 0.5), "x");
    }

    #[test]
    fn test_boosted_garment_gets_hard_brackets() {
        let mut s = spec();
        s.slot_weights = HashMap::from([(AttributeSlot::Garment, 1.0)]);
        let rendered = render(fragments(&s, &[], &[], &[]), 100);
        assert!(rendered.text.contains("[tailored blazer]"));
    }

    #[test]
    fn test_pose_tokens_always_present() {
        let rendered = render(fragments(&spec(), &[], &[], &[]), 50);
        assert!(rendered.text.contains("(three-quarter length shot:1.3)"));
        assert!(rendered.text.contains("(model facing camera:1.3)"));
    }

    #[test]
    fn test_negatives_required_and_absent_from_text() {
        let rendered = render(fragments(&spec(), &[], &[], &[]), 50);
        for required in REQUIRED_NEGATIVES {
            assert!(rendered.negative_text.contains(required));
            assert!(!rendered.text.contains(required));
        }
    }

    #[test]
    fn test_word_budget_enforced_with_priority() {
        let rlhf: Vec<String> = (0..10).map(|i| format!("learned-token-{i}")).collect();
        let user: Vec<String> = (0..10).map(|i| format!("user-token-{i}")).collect();
        let explore: Vec<String> = (0..10).map(|i| format!("explore-token-{i}")).collect();
        let rendered = render(fragments(&spec(), &rlhf, &user, &explore), 50);
        assert!(rendered.truncated);
        assert!(word_count(&rendered.text) <= 50);
        // Core fragments survive truncation.
        assert!(rendered.text.contains("blazer"));
        assert!(rendered.text.contains("model facing camera"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render(fragments(&spec(), &["soft light".into()], &[], &[]), 50);
        let b = render(fragments(&spec(), &["soft light".into()], &[], &[]), 50);
        assert_eq!(a.text, b.text);
        assert_eq!(a.negative_text, b.negative_text);
        assert_eq!(a.truncated, b.truncated);
    }

    #[test]
    fn test_under_budget_keeps_everything() {
        let rendered = render(fragments(&spec(), &["soft light".into()], &[], &[]), 100);
        assert!(!rendered.truncated);
        assert!(rendered.text.contains("soft light"));
    }
}
