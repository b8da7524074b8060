//! Logical-consistency rules applied to raw descriptors.
//!
//! Runs after the vision model answers and before anything is persisted.
//! Deterministic and pure: the same descriptor always yields the same
//! outcome, and re-validating an already-validated descriptor changes
//! nothing.

use crate::types::{Descriptor, DescriptorCorrection, GarmentAnalysis, UNCERTAIN};

use super::{Taxonomy, VocabSlot};

/// Result of validating one descriptor.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// The corrected descriptor. Meaningless when `ok` is false.
    pub descriptor: Descriptor,
    /// Audit trail of every correction applied.
    pub corrections: Vec<DescriptorCorrection>,
    /// False on unrecoverable violations (e.g. no garment at all).
    pub ok: bool,
    /// Reason for `ok = false`.
    pub reason: Option<String>,
    /// Set when any fabric answer was generic ("fabric", "material"…).
    /// The extractor treats this as a retry trigger.
    pub generic_fabric: bool,
}

/// Generic fabric answers that trigger a stricter retry.
const GENERIC_FABRICS: &[&str] = &["fabric", "material", "cloth", "textile", "mixed"];

/// Garment categories that cannot be sleeveless.
const SLEEVED_OUTERWEAR: &[&str] = &["jacket", "blazer", "coat", "bomber jacket", "shirt jacket"];

/// Bottom-half garment types used by the two-piece rule.
const BOTTOMS: &[&str] = &["skirt", "pants", "trousers", "jeans", "shorts"];

/// Validate and correct a descriptor against the global taxonomy.
pub fn validate(input: &Descriptor) -> ValidationOutcome {
    validate_with(Taxonomy::global(), input)
}

/// Validate against a specific taxonomy (tests inject reduced ones).
pub fn validate_with(taxonomy: &Taxonomy, input: &Descriptor) -> ValidationOutcome {
    let mut descriptor = input.clone();
    let mut corrections = Vec::new();
    let mut generic_fabric = false;

    if descriptor.garments.is_empty() {
        return ValidationOutcome {
            descriptor,
            corrections,
            ok: false,
            reason: Some("no garment identified in image".to_string()),
            generic_fabric: false,
        };
    }

    for i in 0..descriptor.garments.len() {
        let path = format!("garments[{i}]");
        let garment = &mut descriptor.garments[i];

        canonicalize_field(
            taxonomy,
            VocabSlot::Garment,
            &mut garment.garment_type,
            &format!("{path}.type"),
            &mut corrections,
        );
        if is_generic_fabric(&garment.fabric.primary_material) {
            generic_fabric = true;
        }
        canonicalize_field(
            taxonomy,
            VocabSlot::Fabric,
            &mut garment.fabric.primary_material,
            &format!("{path}.fabric.primary_material"),
            &mut corrections,
        );
        canonicalize_opt(
            taxonomy,
            VocabSlot::Silhouette,
            &mut garment.silhouette,
            &format!("{path}.silhouette"),
            &mut corrections,
        );
        canonicalize_opt(
            taxonomy,
            VocabSlot::Neckline,
            &mut garment.neckline,
            &format!("{path}.neckline"),
            &mut corrections,
        );
        canonicalize_opt(
            taxonomy,
            VocabSlot::SleeveLength,
            &mut garment.sleeve_length,
            &format!("{path}.sleeve_length"),
            &mut corrections,
        );
        canonicalize_opt(
            taxonomy,
            VocabSlot::Collar,
            &mut garment.collar,
            &format!("{path}.collar"),
            &mut corrections,
        );
        canonicalize_opt(
            taxonomy,
            VocabSlot::Pattern,
            &mut garment.pattern,
            &format!("{path}.pattern"),
            &mut corrections,
        );

        apply_blazer_rules(garment, &path, &mut corrections);
        apply_sleeveless_rule(garment, &path, &mut corrections);
    }

    apply_two_piece_rule(&mut descriptor, &mut corrections);
    canonicalize_photography(taxonomy, &mut descriptor, &mut corrections);

    ValidationOutcome {
        descriptor,
        corrections,
        ok: true,
        reason: None,
        generic_fabric,
    }
}

fn is_generic_fabric(material: &str) -> bool {
    let m = material.trim().to_lowercase();
    m.is_empty() || GENERIC_FABRICS.contains(&m.as_str())
}

/// Blazer ⇒ lapels. A shirt collar reclassifies to `shirt jacket`;
/// ribbed cuffs or hem reclassify to `bomber jacket`.
fn apply_blazer_rules(
    garment: &mut GarmentAnalysis,
    path: &str,
    corrections: &mut Vec<DescriptorCorrection>,
) {
    if garment.garment_type != "blazer" {
        return;
    }
    let has_ribbing = garment
        .construction_details
        .iter()
        .any(|d| d.to_lowercase().contains("ribbed"));
    if has_ribbing {
        push_correction(
            corrections,
            format!("{path}.type"),
            &garment.garment_type,
            "bomber jacket",
            "blazer_ribbed_trim",
        );
        garment.garment_type = "bomber jacket".to_string();
        return;
    }
    if garment.collar.as_deref() == Some("shirt collar") {
        push_correction(
            corrections,
            format!("{path}.type"),
            &garment.garment_type,
            "shirt jacket",
            "blazer_shirt_collar",
        );
        garment.garment_type = "shirt jacket".to_string();
    }
}

/// Sleeveless outerwear is a vest: quilted construction maps to
/// `quilted vest`, anything else to `vest`.
fn apply_sleeveless_rule(
    garment: &mut GarmentAnalysis,
    path: &str,
    corrections: &mut Vec<DescriptorCorrection>,
) {
    if garment.sleeve_length.as_deref() != Some("sleeveless") {
        return;
    }
    if !SLEEVED_OUTERWEAR.contains(&garment.garment_type.as_str()) {
        return;
    }
    let quilted = garment
        .construction_details
        .iter()
        .any(|d| d.to_lowercase().contains("quilt"));
    let target = if quilted { "quilted vest" } else { "vest" };
    push_correction(
        corrections,
        format!("{path}.type"),
        &garment.garment_type,
        target,
        "sleeveless_outerwear_is_vest",
    );
    garment.garment_type = target.to_string();
}

/// Two-piece discipline: a `dress` that shares the frame with a separate
/// bottom is a separated set, never a dress.
fn apply_two_piece_rule(descriptor: &mut Descriptor, corrections: &mut Vec<DescriptorCorrection>) {
    let has_bottom = descriptor
        .garments
        .iter()
        .any(|g| BOTTOMS.contains(&g.garment_type.as_str()));
    if !has_bottom {
        return;
    }
    for (i, garment) in descriptor.garments.iter_mut().enumerate() {
        if garment.garment_type != "dress" {
            continue;
        }
        let continuous = garment
            .construction_details
            .iter()
            .any(|d| d.to_lowercase().contains("continuous"));
        if continuous {
            continue;
        }
        push_correction(
            corrections,
            format!("garments[{i}].type"),
            &garment.garment_type,
            "two-piece",
            "separated_set_is_two_piece",
        );
        garment.garment_type = "two-piece".to_string();
    }
}

fn canonicalize_photography(
    taxonomy: &Taxonomy,
    descriptor: &mut Descriptor,
    corrections: &mut Vec<DescriptorCorrection>,
) {
    let photo = &mut descriptor.photography;
    canonicalize_opt(
        taxonomy,
        VocabSlot::ShotType,
        &mut photo.shot_composition.shot_type,
        "photography.shot_composition.type",
        corrections,
    );
    canonicalize_opt(
        taxonomy,
        VocabSlot::LightingType,
        &mut photo.lighting.lighting_type,
        "photography.lighting.type",
        corrections,
    );
    canonicalize_opt(
        taxonomy,
        VocabSlot::LightingDirection,
        &mut photo.lighting.direction,
        "photography.lighting.direction",
        corrections,
    );
    canonicalize_opt(
        taxonomy,
        VocabSlot::CameraAngle,
        &mut photo.camera.angle,
        "photography.camera.angle",
        corrections,
    );
    canonicalize_opt(
        taxonomy,
        VocabSlot::CameraHeight,
        &mut photo.camera.height,
        "photography.camera.height",
        corrections,
    );
    canonicalize_opt(
        taxonomy,
        VocabSlot::Background,
        &mut photo.background,
        "photography.background",
        corrections,
    );
}

/// Canonicalize a required field in place, replacing out-of-vocabulary
/// answers with the uncertainty sentinel.
fn canonicalize_field(
    taxonomy: &Taxonomy,
    slot: VocabSlot,
    value: &mut String,
    path: &str,
    corrections: &mut Vec<DescriptorCorrection>,
) {
    if value == UNCERTAIN {
        return;
    }
    match taxonomy.canonicalize(slot, value) {
        Some(canonical) => {
            if canonical != *value {
                push_correction(corrections, path.to_string(), value, &canonical, "vocab_alias");
                *value = canonical;
            }
        }
        None => {
            push_correction(
                corrections,
                path.to_string(),
                value,
                UNCERTAIN,
                "vocab_unrecognized",
            );
            *value = UNCERTAIN.to_string();
        }
    }
}

fn canonicalize_opt(
    taxonomy: &Taxonomy,
    slot: VocabSlot,
    value: &mut Option<String>,
    path: &str,
    corrections: &mut Vec<DescriptorCorrection>,
) {
    if let Some(v) = value {
        if !Descriptor::is_informative(v) {
            *value = None;
            return;
        }
        canonicalize_field(taxonomy, slot, v, path, corrections);
    }
}

fn push_correction(
    corrections: &mut Vec<DescriptorCorrection>,
    field_path: String,
    ai_value: &str,
    corrected_value: &str,
    rule_id: &str,
) {
    corrections.push(DescriptorCorrection {
        field_path,
        ai_value: ai_value.to_string(),
        corrected_value: corrected_value.to_string(),
        rule_id: rule_id.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColorEntry, FabricAnalysis};

    fn garment(garment_type: &str) -> GarmentAnalysis {
        GarmentAnalysis {
            garment_type: garment_type.to_string(),
            fabric: FabricAnalysis {
                primary_material: "wool suiting".to_string(),
                ..Default::default()
            },
            color_palette: vec![ColorEntry {
                color_name: "navy".to_string(),
                placement: None,
            }],
            ..Default::default()
        }
    }

    fn descriptor(garments: Vec<GarmentAnalysis>) -> Descriptor {
        Descriptor {
            garments,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_garment_is_unrecoverable() {
        let outcome = validate(&descriptor(vec![]));
        assert!(!outcome.ok);
        assert!(outcome.reason.unwrap().contains("no garment"));
    }

    #[test]
    fn test_blazer_with_shirt_collar_becomes_shirt_jacket() {
        let mut g = garment("blazer");
        g.collar = Some("shirt collar".to_string());
        let outcome = validate(&descriptor(vec![g]));
        assert!(outcome.ok);
        assert_eq!(outcome.descriptor.garments[0].garment_type, "shirt jacket");
        let c = outcome
            .corrections
            .iter()
            .find(|c| c.rule_id == "blazer_shirt_collar")
            .unwrap();
        assert_eq!(c.field_path, "garments[0].type");
        assert_eq!(c.ai_value, "blazer");
    }

    #[test]
    fn test_blazer_with_ribbed_trim_becomes_bomber() {
        let mut g = garment("blazer");
        g.collar = Some("notched lapel".to_string());
        g.construction_details = vec!["ribbed cuffs".to_string()];
        let outcome = validate(&descriptor(vec![g]));
        assert_eq!(outcome.descriptor.garments[0].garment_type, "bomber jacket");
    }

    #[test]
    fn test_sleeveless_jacket_becomes_vest() {
        let mut g = garment("jacket");
        g.sleeve_length = Some("sleeveless".to_string());
        let outcome = validate(&descriptor(vec![g]));
        assert_eq!(outcome.descriptor.garments[0].garment_type, "vest");

        let mut g = garment("coat");
        g.sleeve_length = Some("sleeveless".to_string());
        g.construction_details = vec!["diamond quilting".to_string()];
        let outcome = validate(&descriptor(vec![g]));
        assert_eq!(outcome.descriptor.garments[0].garment_type, "quilted vest");
    }

    #[test]
    fn test_separated_dress_becomes_two_piece() {
        let outcome = validate(&descriptor(vec![garment("dress"), garment("skirt")]));
        assert_eq!(outcome.descriptor.garments[0].garment_type, "two-piece");

        // A lone dress with continuous fabric is left alone.
        let mut g = garment("dress");
        g.construction_details = vec!["continuous fabric through bodice".to_string()];
        let outcome = validate(&descriptor(vec![g, garment("skirt")]));
        assert_eq!(outcome.descriptor.garments[0].garment_type, "dress");
    }

    #[test]
    fn test_generic_fabric_flagged_and_sentineled() {
        let mut g = garment("blazer");
        g.collar = Some("notched lapel".to_string());
        g.fabric.primary_material = "fabric".to_string();
        let outcome = validate(&descriptor(vec![g]));
        assert!(outcome.generic_fabric);
        assert_eq!(
            outcome.descriptor.garments[0].fabric.primary_material,
            UNCERTAIN
        );
    }

    #[test]
    fn test_unknown_garment_gets_sentinel() {
        let outcome = validate(&descriptor(vec![garment("spacesuit")]));
        assert_eq!(outcome.descriptor.garments[0].garment_type, UNCERTAIN);
        assert!(outcome
            .corrections
            .iter()
            .any(|c| c.rule_id == "vocab_unrecognized"));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let mut g = garment("blazer");
        g.collar = Some("Shirt Collar".to_string());
        g.sleeve_length = Some("LONG SLEEVE".to_string());
        let first = validate(&descriptor(vec![g]));
        let second = validate(&first.descriptor);
        assert!(second.corrections.is_empty());
        assert_eq!(
            serde_json::to_value(&first.descriptor).unwrap(),
            serde_json::to_value(&second.descriptor).unwrap()
        );
    }

    #[test]
    fn test_closed_fields_end_in_vocabulary_or_sentinel() {
        let mut g = garment("Bomber-Jacket");
        g.silhouette = Some("weird shape".to_string());
        g.neckline = Some("crewneck".to_string());
        let outcome = validate(&descriptor(vec![g]));
        let got = &outcome.descriptor.garments[0];
        let t = Taxonomy::global();
        assert!(t.contains(VocabSlot::Garment, &got.garment_type));
        assert_eq!(got.silhouette.as_deref(), Some(UNCERTAIN));
        assert_eq!(got.neckline.as_deref(), Some("crew neck"));
    }
}
