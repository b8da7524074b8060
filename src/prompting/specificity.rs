//! User-command interpretation.
//!
//! Free text is classified into low / medium / high specificity and
//! mined for concrete slot values. High-specificity commands freeze the
//! slots they set; the bandit only fills what is left.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::taxonomy::{Taxonomy, VocabSlot};
use crate::types::Specificity;

/// Color words recognized in commands. Colors have no closed taxonomy,
/// so the command parser carries its own list.
const COLOR_WORDS: &[&str] = &[
    "black", "white", "cream", "ivory", "beige", "camel", "tan", "brown", "navy", "blue",
    "cobalt", "teal", "green", "olive", "sage", "red", "burgundy", "maroon", "pink", "blush",
    "purple", "lavender", "yellow", "mustard", "orange", "rust", "grey", "gray", "charcoal",
    "silver", "gold",
];

/// Fabric families mapped onto vocabulary values when the command names
/// the family rather than the exact material.
const FABRIC_FAMILIES: &[(&str, &str)] = &[
    ("wool", "wool suiting"),
    ("silk", "silk charmeuse"),
    ("cotton", "cotton twill"),
    ("denim", "denim"),
    ("leather", "leather"),
    ("suede", "suede"),
    ("linen", "linen"),
    ("cashmere", "cashmere"),
    ("tweed", "tweed"),
    ("corduroy", "corduroy"),
    ("velvet", "velvet"),
    ("satin", "satin"),
    ("taffeta", "nylon taffeta"),
    ("knit", "ponte knit"),
];

/// Construction-detail phrases that read as technical precision.
const CONSTRUCTION_TERMS: &[&str] = &[
    "double-breasted",
    "single-breasted",
    "peak lapels",
    "peak lapel",
    "notched lapels",
    "notched lapel",
    "shawl lapel",
    "patch pockets",
    "welt pockets",
    "ribbed cuffs",
    "ribbed hem",
    "quilted",
    "topstitching",
    "raw hem",
    "pleated",
    "belted",
    "cropped",
    "longline",
];

static IMPERATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(exactly|must|precisely|only|strictly|specifically)\b").unwrap()
});

static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(one|two|three|a few|several|some|many|\d+)\b").unwrap()
});

/// Concrete slot values mined from a command.
#[derive(Debug, Clone, Default)]
pub struct ParsedCommand {
    pub raw: String,
    pub garment: Option<String>,
    pub colors: Vec<String>,
    pub fabric: Option<String>,
    pub silhouette: Option<String>,
    pub finish: Option<String>,
    pub details: Vec<String>,
    pub specificity: Specificity,
}

impl ParsedCommand {
    /// How many concrete attributes the command pins down.
    pub fn attribute_count(&self) -> usize {
        usize::from(self.garment.is_some())
            + self.colors.len()
            + usize::from(self.fabric.is_some())
            + usize::from(self.silhouette.is_some())
            + usize::from(self.finish.is_some())
            + self.details.len()
    }
}

/// Classify a command and extract its concrete attributes.
pub fn interpret(command: &str) -> ParsedCommand {
    let taxonomy = Taxonomy::global();
    let lower = command.to_lowercase();
    let mut parsed = ParsedCommand {
        raw: command.to_string(),
        ..Default::default()
    };

    // Longest vocabulary match wins for the garment ("bomber jacket"
    // before "jacket").
    let mut garments: Vec<&String> = taxonomy.values(VocabSlot::Garment).iter().collect();
    garments.sort_by_key(|g| std::cmp::Reverse(g.len()));
    parsed.garment = garments
        .into_iter()
        .find(|g| contains_word(&lower, g))
        .cloned();

    for color in COLOR_WORDS {
        if contains_word(&lower, color) {
            parsed.colors.push((*color).to_string());
        }
    }

    // Exact fabric values beat family keywords.
    parsed.fabric = taxonomy
        .values(VocabSlot::Fabric)
        .iter()
        .find(|f| lower.contains(f.as_str()))
        .cloned()
        .or_else(|| {
            FABRIC_FAMILIES
                .iter()
                .find(|(family, _)| contains_word(&lower, family))
                .map(|(_, value)| (*value).to_string())
        });

    parsed.silhouette = taxonomy
        .values(VocabSlot::Silhouette)
        .iter()
        .find(|s| contains_word(&lower, s))
        .cloned();

    parsed.finish = taxonomy
        .values(VocabSlot::Finish)
        .iter()
        .find(|f| contains_word(&lower, f))
        .cloned();

    for term in CONSTRUCTION_TERMS {
        if lower.contains(term) {
            parsed.details.push((*term).to_string());
        }
    }
    // "peak lapels" also matches "peak lapel"; collapse overlaps.
    parsed.details.dedup_by(|a, b| a.contains(b.as_str()) || b.contains(a.as_str()));

    parsed.specificity = classify(&lower, &parsed);
    parsed
}

fn classify(lower: &str, parsed: &ParsedCommand) -> Specificity {
    let attributes = parsed.attribute_count();
    let technical = parsed.fabric.is_some() || !parsed.details.is_empty();
    let imperative = IMPERATIVE_RE.is_match(lower);
    let word_count = lower.split_whitespace().count().max(1);
    let quantity_ratio = QUANTITY_RE.find_iter(lower).count() as f64 / word_count as f64;

    if attributes >= 3 || (attributes >= 2 && technical) || (imperative && attributes >= 1) {
        Specificity::High
    } else if attributes >= 1 || quantity_ratio > 0.2 {
        Specificity::Medium
    } else {
        Specificity::Low
    }
}

/// Whole-word containment, so "tan" never fires inside "tank".
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack
        .match_indices(needle)
        .any(|(i, _)| {
            let before = haystack[..i].chars().next_back();
            let after = haystack[i + needle.len()..].chars().next();
            before.map_or(true, |c| !c.is_alphanumeric())
                && after.map_or(true, |c| !c.is_alphanumeric())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_specificity_command() {
        let parsed = interpret("navy wool double-breasted blazer with peak lapels");
        assert_eq!(parsed.specificity, Specificity::High);
        assert_eq!(parsed.garment.as_deref(), Some("blazer"));
        assert_eq!(parsed.colors, vec!["navy".to_string()]);
        assert_eq!(parsed.fabric.as_deref(), Some("wool suiting"));
        assert!(parsed.details.iter().any(|d| d.contains("double-breasted")));
        assert!(parsed.details.iter().any(|d| d.contains("peak lapel")));
    }

    #[test]
    fn test_low_specificity_command() {
        let parsed = interpret("something elegant");
        assert_eq!(parsed.specificity, Specificity::Low);
        assert_eq!(parsed.attribute_count(), 0);
    }

    #[test]
    fn test_medium_specificity_command() {
        let parsed = interpret("a flowy dress for summer");
        assert_eq!(parsed.specificity, Specificity::Medium);
        assert_eq!(parsed.garment.as_deref(), Some("dress"));
        assert_eq!(parsed.silhouette.as_deref(), Some("flowy"));
    }

    #[test]
    fn test_imperative_raises_specificity() {
        let parsed = interpret("must be a trench coat");
        assert_eq!(parsed.specificity, Specificity::High);
        assert_eq!(parsed.garment.as_deref(), Some("trench coat"));
    }

    #[test]
    fn test_longest_garment_match_wins() {
        let parsed = interpret("an oversized bomber jacket");
        assert_eq!(parsed.garment.as_deref(), Some("bomber jacket"));
        assert_eq!(parsed.silhouette.as_deref(), Some("oversized"));
    }

    #[test]
    fn test_word_boundaries_respected() {
        // "tan" must not match inside "tank"; no other attribute either.
        let parsed = interpret("a tank of fuel");
        assert!(parsed.colors.is_empty());
    }

    #[test]
    fn test_exact_fabric_beats_family() {
        let parsed = interpret("a silk organza blouse");
        assert_eq!(parsed.fabric.as_deref(), Some("silk organza"));
    }
}
