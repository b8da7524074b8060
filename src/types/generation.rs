//! Generation entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Validation state of a generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Produced but not yet scored.
    Pending,
    /// Scored and kept by the selector.
    Selected,
    /// Scored below threshold or lost the diversity pick.
    Rejected,
    /// Adapter or upload failure; excluded from results.
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Selected => "selected",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "selected" => Some(Self::Selected),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One image synthesized from one prompt spec.
///
/// Rows are append-only; the selector updates status and quality score
/// but nothing is ever deleted outside portfolio teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub id: String,
    pub user_id: UserId,
    /// Weak reference to the prompt spec that produced this image.
    pub prompt_id: String,
    /// Which of the k paired outputs this is (0-based).
    pub generation_index: usize,
    pub provider: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Finite and non-negative, always.
    pub cost_cents: u32,
    pub created_at: DateTime<Utc>,
    /// Set by the selector; None until scored.
    pub quality_score: Option<f64>,
    pub status: GenerationStatus,
    /// Scrubbed failure description for per-item error reporting.
    pub error: Option<String>,
}
