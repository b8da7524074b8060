//! Mechanical quality metrics.
//!
//! Completeness and confidence are derived from what the descriptor
//! actually contains, not taken from the model's self-report. The
//! model's per-garment confidence is kept only as one bounded input.

use crate::types::Descriptor;

/// Recompute `metadata.overall_confidence` and
/// `metadata.completeness_percentage` in place.
pub fn score(descriptor: &mut Descriptor) {
    let completeness = completeness_percentage(descriptor);
    let confidence = overall_confidence(descriptor, completeness);
    descriptor.metadata.completeness_percentage = completeness;
    descriptor.metadata.overall_confidence = confidence;
}

/// Schema fill rate in [0, 100]: the share of informative answers over
/// the fields the schema asks for.
pub fn completeness_percentage(descriptor: &Descriptor) -> f64 {
    let mut tally = FillTally::default();

    tally.field(Some(&descriptor.executive_summary));
    for garment in &descriptor.garments {
        tally.field(Some(&garment.garment_type));
        tally.field(Some(&garment.fabric.primary_material));
        tally.field(garment.silhouette.as_deref());
        tally.field(garment.sleeve_length.as_deref());
        tally.field(garment.collar.as_deref());
        tally.field(garment.pattern.as_deref());
        tally.list(!garment.color_palette.is_empty());
        tally.list(!garment.construction_details.is_empty());
    }
    let photo = &descriptor.photography;
    tally.field(photo.shot_composition.shot_type.as_deref());
    tally.field(photo.lighting.lighting_type.as_deref());
    tally.field(photo.lighting.direction.as_deref());
    tally.field(photo.camera.angle.as_deref());
    tally.field(photo.camera.height.as_deref());
    tally.field(photo.background.as_deref());
    tally.field(descriptor.styling_context.as_deref());
    tally.field(descriptor.contextual_attributes.mood_aesthetic.as_deref());
    tally.field(descriptor.contextual_attributes.season.as_deref());
    tally.field(descriptor.contextual_attributes.occasion.as_deref());

    tally.percentage()
}

#[derive(Default)]
struct FillTally {
    asked: u32,
    filled: u32,
}

impl FillTally {
    fn field(&mut self, value: Option<&str>) {
        self.asked += 1;
        if value.is_some_and(Descriptor::is_informative) {
            self.filled += 1;
        }
    }

    fn list(&mut self, present: bool) {
        self.asked += 1;
        if present {
            self.filled += 1;
        }
    }

    fn percentage(&self) -> f64 {
        if self.asked == 0 {
            return 0.0;
        }
        (f64::from(self.filled) / f64::from(self.asked) * 100.0).clamp(0.0, 100.0)
    }
}

/// Overall confidence in [0, 1]: mean reported per-garment confidence
/// (where present, clamped) blended with the fill rate.
pub fn overall_confidence(descriptor: &Descriptor, completeness: f64) -> f64 {
    let reported: Vec<f64> = descriptor
        .garments
        .iter()
        .filter_map(|g| g.confidence)
        .filter(|c| c.is_finite())
        .map(|c| if c > 1.0 { c / 100.0 } else { c })
        .map(|c| c.clamp(0.0, 1.0))
        .collect();
    let fill = (completeness / 100.0).clamp(0.0, 1.0);
    if reported.is_empty() {
        // Nothing self-reported: fill rate alone, discounted.
        return (fill * 0.8).clamp(0.0, 1.0);
    }
    let mean = reported.iter().sum::<f64>() / reported.len() as f64;
    (0.6 * mean + 0.4 * fill).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColorEntry, FabricAnalysis, GarmentAnalysis};

    fn rich_descriptor() -> Descriptor {
        Descriptor {
            executive_summary: "Navy blazer look.".into(),
            garments: vec![GarmentAnalysis {
                garment_type: "blazer".into(),
                silhouette: Some("tailored".into()),
                fabric: FabricAnalysis {
                    primary_material: "wool suiting".into(),
                    ..Default::default()
                },
                color_palette: vec![ColorEntry {
                    color_name: "navy".into(),
                    placement: None,
                }],
                construction_details: vec!["notched lapel".into()],
                sleeve_length: Some("long".into()),
                collar: Some("notched lapel".into()),
                pattern: Some("solid".into()),
                confidence: Some(0.9),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_completeness_tracks_fill_rate() {
        let rich = completeness_percentage(&rich_descriptor());
        let sparse = completeness_percentage(&Descriptor::default());
        assert!(rich > 40.0);
        assert!(sparse < 10.0);
    }

    #[test]
    fn test_uncertain_answers_do_not_count_as_filled() {
        let mut d = rich_descriptor();
        let base = completeness_percentage(&d);
        d.garments[0].silhouette = Some("uncertain".into());
        assert!(completeness_percentage(&d) < base);
    }

    #[test]
    fn test_confidence_blends_and_clamps() {
        let mut d = rich_descriptor();
        score(&mut d);
        assert!(d.metadata.overall_confidence > 0.5);
        assert!(d.metadata.overall_confidence <= 1.0);

        // Percent-scale self-report is rescaled, not trusted raw.
        d.garments[0].confidence = Some(90.0);
        let c = overall_confidence(&d, 50.0);
        assert!(c < 1.0);

        // No self-report at all still yields a usable score.
        d.garments[0].confidence = None;
        let c = overall_confidence(&d, 100.0);
        assert!((c - 0.8).abs() < 1e-9);
    }
}
