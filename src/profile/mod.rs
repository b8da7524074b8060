//! Style-profile aggregation.
//!
//! Pure over a portfolio's descriptors: same multiset in, same profile
//! out. No I/O here; the caller loads descriptors and persists the
//! result.

use std::collections::HashMap;

use chrono::Utc;

use crate::types::{Descriptor, SignaturePiece, SlotDistribution, StyleProfile};

/// Per-garment confidence above which a piece with a standout detail is
/// surfaced as a signature exemplar.
const SIGNATURE_CONFIDENCE: f64 = 0.85;

/// How many construction patterns the profile reports.
const CONSTRUCTION_TOP_K: usize = 8;

/// Words too generic to count as aesthetic themes on their own.
const GENERIC_THEME_TERMS: &[&str] = &[
    "nice", "good", "modern", "stylish", "fashion", "clothing", "casual", "basic", "simple",
];

/// Aggregate descriptors into a style profile.
pub fn aggregate(user_id: &str, portfolio_id: &str, descriptors: &[Descriptor]) -> StyleProfile {
    let mut profile = StyleProfile {
        user_id: user_id.to_string(),
        portfolio_id: portfolio_id.to_string(),
        total_images: descriptors.len() as u32,
        generated_at: Some(Utc::now()),
        ..Default::default()
    };

    let mut construction: HashMap<String, u32> = HashMap::new();
    let mut theme_counts: HashMap<String, u32> = HashMap::new();

    for descriptor in descriptors {
        for garment in &descriptor.garments {
            add_informative(&mut profile.garments, &garment.garment_type);
            add_informative(&mut profile.fabrics, &garment.fabric.primary_material);
            if let Some(s) = &garment.silhouette {
                add_informative(&mut profile.silhouettes, s);
            }
            for color in garment_colors(garment) {
                add_informative(&mut profile.colors, &color);
            }
            for detail in &garment.construction_details {
                let detail = detail.trim().to_lowercase();
                if Descriptor::is_informative(&detail) {
                    *construction.entry(detail).or_insert(0) += 1;
                }
            }
        }
        if let Some(l) = &descriptor.photography.lighting.lighting_type {
            add_informative(&mut profile.lighting, l);
        }
        if let Some(c) = &descriptor.photography.camera.angle {
            add_informative(&mut profile.camera, c);
        }
        if let Some(b) = &descriptor.photography.background {
            add_informative(&mut profile.backgrounds, b);
        }
        for theme in descriptor_themes(descriptor) {
            *theme_counts.entry(theme).or_insert(0) += 1;
        }
    }

    profile.aesthetic_themes = rank_themes(theme_counts, descriptors.len());
    profile.construction_patterns = top_k(construction, CONSTRUCTION_TOP_K);
    profile.signature_pieces = signature_pieces(descriptors);

    let confidences: Vec<f64> = descriptors
        .iter()
        .map(|d| d.metadata.overall_confidence)
        .collect();
    let completenesses: Vec<f64> = descriptors
        .iter()
        .map(|d| d.metadata.completeness_percentage)
        .collect();
    profile.avg_confidence = rollup_confidence(&confidences);
    profile.avg_completeness = rollup_completeness(&completenesses);
    profile.summary_text = summary_text(&profile);
    profile
}

fn add_informative(distribution: &mut SlotDistribution, value: &str) {
    let v = value.trim().to_lowercase();
    if Descriptor::is_informative(&v) {
        distribution.add(&v);
    }
}

/// Color names for one garment, tolerating JSON-stored strings that
/// leak through from older extraction runs.
fn garment_colors(garment: &crate::types::GarmentAnalysis) -> Vec<String> {
    let mut colors = Vec::new();
    for entry in &garment.color_palette {
        let raw = entry.color_name.trim();
        if raw.starts_with('[') {
            // A JSON array serialized into the name field.
            if let Ok(parsed) = serde_json::from_str::<Vec<String>>(raw) {
                colors.extend(parsed);
                continue;
            }
        }
        colors.push(raw.to_string());
    }
    colors
}

/// Split mood labels into candidate themes.
fn descriptor_themes(descriptor: &Descriptor) -> Vec<String> {
    let mut sources = Vec::new();
    if let Some(mood) = &descriptor.contextual_attributes.mood_aesthetic {
        sources.push(mood.as_str());
    }
    if let Some(styling) = &descriptor.styling_context {
        sources.push(styling.as_str());
    }
    let mut themes = Vec::new();
    for source in sources {
        for part in source.split(['/', ',']) {
            let theme = part.trim().to_lowercase();
            if !Descriptor::is_informative(&theme) {
                continue;
            }
            if GENERIC_THEME_TERMS.contains(&theme.as_str()) {
                continue;
            }
            // Styling context is prose; only short label-like fragments
            // qualify as themes.
            if theme.split_whitespace().count() > 3 {
                continue;
            }
            themes.push(theme);
        }
    }
    themes.sort();
    themes.dedup();
    themes
}

/// Keep themes with enough support, most frequent first, re-capitalized.
fn rank_themes(counts: HashMap<String, u32>, total_images: usize) -> Vec<String> {
    let min_support = if total_images < 3 { 1 } else { 2 };
    let mut ranked: Vec<(String, u32)> = counts
        .into_iter()
        .filter(|(_, n)| *n >= min_support)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().map(|(t, _)| capitalize(&t)).collect()
}

fn capitalize(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn top_k(counts: HashMap<String, u32>, k: usize) -> Vec<(String, u32)> {
    let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(k);
    ranked
}

fn signature_pieces(descriptors: &[Descriptor]) -> Vec<SignaturePiece> {
    let mut pieces = Vec::new();
    for descriptor in descriptors {
        for garment in &descriptor.garments {
            let Some(confidence) = garment.confidence else {
                continue;
            };
            if confidence < SIGNATURE_CONFIDENCE {
                continue;
            }
            let Some(detail) = garment
                .construction_details
                .iter()
                .find(|d| Descriptor::is_informative(d))
            else {
                continue;
            };
            if !Descriptor::is_informative(&garment.garment_type) {
                continue;
            }
            let fabric = &garment.fabric.primary_material;
            let label = if Descriptor::is_informative(fabric) {
                format!("{} in {}", garment.garment_type, fabric)
            } else {
                garment.garment_type.clone()
            };
            pieces.push(SignaturePiece {
                label,
                garment_type: garment.garment_type.clone(),
                standout_detail: detail.clone(),
                confidence,
            });
        }
    }
    pieces.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label))
    });
    pieces.dedup_by(|a, b| a.label == b.label);
    pieces.truncate(6);
    pieces
}

/// Mean confidence with rescale-then-clamp. Percent-scale inputs are
/// brought back to [0,1]; NaN contributes 0.
fn rollup_confidence(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values
        .iter()
        .map(|&v| {
            let v = if v.is_nan() { 0.0 } else { v };
            let v = if v > 1.0 { v / 100.0 } else { v };
            v.clamp(0.0, 1.0)
        })
        .sum();
    (sum / values.len() as f64).clamp(0.0, 9.999)
}

/// Mean completeness with rescale-then-clamp. Fraction-scale inputs are
/// brought up to [0,100]; NaN contributes 0.
fn rollup_completeness(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values
        .iter()
        .map(|&v| {
            let v = if v.is_nan() { 0.0 } else { v };
            let v = if v > 0.0 && v <= 1.0 { v * 100.0 } else { v };
            v.clamp(0.0, 100.0)
        })
        .sum();
    (sum / values.len() as f64).clamp(0.0, 999.99)
}

/// Deterministic template summary. No model call involved.
fn summary_text(profile: &StyleProfile) -> String {
    let themes: Vec<&str> = profile
        .aesthetic_themes
        .iter()
        .take(2)
        .map(String::as_str)
        .collect();
    let theme_clause = if themes.is_empty() {
        "a developing aesthetic".to_string()
    } else {
        themes.join(" and ")
    };

    let garment_clause = match profile.garments.top() {
        Some((garment, count)) => {
            let total = profile.garments.total().max(1);
            let pct = (f64::from(count) / f64::from(total) * 100.0).round() as u32;
            format!("{pct}% of pieces are {garment}s")
        }
        None => "no dominant garment yet".to_string(),
    };

    let colors = join_top(&profile.colors, 3);
    let fabrics = join_top(&profile.fabrics, 2);

    format!(
        "Based on {} images, your style includes {}. {}, dominated by {} in {}.",
        profile.total_images,
        theme_clause,
        garment_clause,
        if colors.is_empty() { "varied colors".to_string() } else { colors },
        if fabrics.is_empty() { "varied fabrics".to_string() } else { fabrics },
    )
}

fn join_top(distribution: &SlotDistribution, n: usize) -> String {
    distribution
        .ranked()
        .into_iter()
        .take(n)
        .map(|(v, _)| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
