//! Free-text critique parsing.
//!
//! Critiques go through the same vision-LLM contract as extraction:
//! one JSON-mode call turning prose into structured deltas. A parse
//! failure degrades to an empty delta set; critique handling never
//! takes the serving path down.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::interfaces::vision::{AnalysisInput, AnalysisRequest, VisionModel};

const CRITIQUE_PROMPT: &str = r#"You translate a designer's critique of a generated fashion image into structured prompt deltas.

Respond with a single JSON object:
{
  "add": ["<tokens the next prompt should include>"],
  "remove": ["<tokens the next prompt should drop>"],
  "slot_overrides": {"<slot>": "<value>"}
}

Slots: garment, fabric, color, lighting, camera, background, silhouette, finish, details.
Tokens are short phrases ("long sleeves", "softer lighting"). Only include what the critique actually asks for.

Critique:"#;

/// Structured deltas extracted from one critique.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CritiqueDeltas {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub slot_overrides: HashMap<String, String>,
}

impl CritiqueDeltas {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.slot_overrides.is_empty()
    }
}

/// Parses critiques through an injected LLM.
#[derive(Clone)]
pub struct CritiqueParser {
    vision: Arc<dyn VisionModel>,
}

impl CritiqueParser {
    pub fn new(vision: Arc<dyn VisionModel>) -> Self {
        Self { vision }
    }

    pub async fn parse(&self, critique: &str) -> EngineResult<CritiqueDeltas> {
        let request = AnalysisRequest {
            input: AnalysisInput::Text(critique.to_string()),
            prompt: CRITIQUE_PROMPT.to_string(),
            schema: None,
        };
        let raw = self.vision.analyze(request).await?;
        let mut deltas: CritiqueDeltas = serde_json::from_value(raw).unwrap_or_default();
        deltas.add.retain(|t| !t.trim().is_empty());
        deltas.remove.retain(|t| !t.trim().is_empty());
        Ok(deltas)
    }
}
