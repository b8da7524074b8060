//! The extraction prompt.
//!
//! One comprehensive, static prompt per deployment: the full controlled
//! vocabulary, a five-step analysis protocol, decision trees between
//! confusable categories, and the output schema. Rendered once through
//! tera at first use; descriptors are tagged with [`PROMPT_VERSION`] so
//! reanalysis can tell prompt generations apart.

use once_cell::sync::Lazy;
use tera::{Context, Tera};

use crate::taxonomy::{Taxonomy, VocabSlot};

/// Bumped whenever the template below changes meaningfully.
pub const PROMPT_VERSION: &str = "forensic-v3";

const TEMPLATE: &str = r#"You are a forensic fashion analyst. Describe exactly what is visible in this image. Never guess: when you cannot verify an attribute, answer "uncertain".

CONTROLLED VOCABULARY. Every closed field must use one of these values or "uncertain":
- garment type: {{ garments }}
- fabric: {{ fabrics }}
- silhouette: {{ silhouettes }}
- neckline: {{ necklines }}
- sleeve length: {{ sleeve_lengths }}
- collar: {{ collars }}
- finish: {{ finishes }}
- texture: {{ textures }}
- pattern: {{ patterns }}
- shot type: {{ shot_types }}
- lighting type: {{ lighting_types }}
- lighting direction: {{ lighting_directions }}
- camera angle: {{ camera_angles }}
- camera height: {{ camera_heights }}
- background: {{ backgrounds }}

ANALYSIS PROTOCOL. Work through these five steps in order:
1. SLEEVELESS CHECK. Look at the arms. If an outer layer has no sleeves it is a vest or gilet, never a jacket, blazer, or coat.
2. COLLAR EXAMINATION. Identify the collar construction precisely. A blazer must have a notched or peak lapel. A flat pointed collar on a jacket-weight layer means shirt jacket. Ribbed collar, cuffs, or hem means bomber jacket.
3. FABRIC VERIFICATION. Name the specific material (e.g. "cotton twill", "silk charmeuse"). Generic answers like "fabric" or "material" are invalid.
4. CONSTRUCTION DETAILS. List every visible detail: closures, pockets, stitching, ribbing, quilting, lapel style, hem treatment.
5. FINAL VERIFICATION. Re-check steps 1-2 against your garment classification before answering.

DECISION TREES for confusable categories:
- blazer vs shirt jacket: lapels → blazer; shirt collar → shirt jacket.
- blazer vs bomber jacket: ribbed cuffs or hem → bomber jacket.
- jacket vs vest: sleeves present → jacket; absent → vest (quilted vest when quilted).
- dress vs two-piece: continuous fabric top to bottom → dress; any visible separation at the waist → two-piece.

Report model demographics only from direct observation: visible characteristics, build, approximate age bucket, gender presentation. Omit any field you cannot observe.

Respond with a single JSON object:
{
  "executive_summary": "<one sentence>",
  "garments": [
    {
      "type": "<vocabulary value>",
      "silhouette": "<vocabulary value>",
      "fabric": {"primary_material": "<specific material>", "weave": "", "finish": "", "weight": ""},
      "color_palette": [{"color_name": "<color>", "placement": "<where>"}],
      "construction_details": ["<detail>"],
      "neckline": "<vocabulary value>",
      "sleeve_length": "<vocabulary value>",
      "collar": "<vocabulary value>",
      "pattern": "<vocabulary value>",
      "layer_index": 0,
      "confidence": 0.0
    }
  ],
  "model_demographics": {
    "ethnicity": {"observed_characteristics": ""},
    "body_type": {"overall_build": ""},
    "age_range": "",
    "gender_presentation": ""
  },
  "photography": {
    "shot_composition": {"type": "<vocabulary value>"},
    "lighting": {"type": "<vocabulary value>", "direction": "<vocabulary value>"},
    "camera": {"angle": "<vocabulary value>", "height": "<vocabulary value>"},
    "background": "<vocabulary value>"
  },
  "styling_context": "",
  "contextual_attributes": {"season": "", "occasion": "", "mood_aesthetic": "<labels separated by />"},
  "technical_fashion_notes": ""
}
"#;

/// Appended on retries triggered by a generic-fabric or low-confidence
/// answer.
pub const STRICT_RETRY_SUFFIX: &str = "\nYour previous answer was rejected. Name SPECIFIC fabrics from the vocabulary, fill every observable field, and use \"uncertain\" only where the image truly does not show the attribute.";

static RENDERED: Lazy<String> = Lazy::new(|| {
    let taxonomy = Taxonomy::global();
    let join = |slot: VocabSlot| taxonomy.values(slot).join(", ");
    let mut context = Context::new();
    context.insert("garments", &join(VocabSlot::Garment));
    context.insert("fabrics", &join(VocabSlot::Fabric));
    context.insert("silhouettes", &join(VocabSlot::Silhouette));
    context.insert("necklines", &join(VocabSlot::Neckline));
    context.insert("sleeve_lengths", &join(VocabSlot::SleeveLength));
    context.insert("collars", &join(VocabSlot::Collar));
    context.insert("finishes", &join(VocabSlot::Finish));
    context.insert("textures", &join(VocabSlot::Texture));
    context.insert("patterns", &join(VocabSlot::Pattern));
    context.insert("shot_types", &join(VocabSlot::ShotType));
    context.insert("lighting_types", &join(VocabSlot::LightingType));
    context.insert("lighting_directions", &join(VocabSlot::LightingDirection));
    context.insert("camera_angles", &join(VocabSlot::CameraAngle));
    context.insert("camera_heights", &join(VocabSlot::CameraHeight));
    context.insert("backgrounds", &join(VocabSlot::Background));
    Tera::one_off(TEMPLATE, &context, false).expect("extraction prompt template must render")
});

/// The full extraction prompt, vocabulary included.
pub fn extraction_prompt() -> &'static str {
    &RENDERED
}
