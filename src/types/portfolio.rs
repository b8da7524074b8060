//! Portfolio and image entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Lifecycle state of a portfolio.
///
/// `Processing → Analyzed | Failed`; additive ingestion moves a terminal
/// portfolio back to `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortfolioStatus {
    Processing,
    Analyzed,
    Failed,
}

impl PortfolioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Analyzed => "analyzed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "analyzed" => Some(Self::Analyzed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// An uploaded reference collection. At most one portfolio per user is
/// active for profile derivation; superseded portfolios stay dormant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub user_id: UserId,
    pub status: PortfolioStatus,
    /// Whether this is the user's active portfolio.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-image analysis state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    Analyzed,
    Failed,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzed => "analyzed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "analyzed" => Some(Self::Analyzed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One picture inside a portfolio. Unique on (portfolio_id,
/// content_hash); duplicates are dropped at ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioImage {
    pub id: String,
    pub portfolio_id: String,
    /// Object-store key for the original bytes.
    pub storage_key: String,
    /// Hex-encoded SHA-256 of the image bytes.
    pub content_hash: String,
    /// Position in the original upload.
    pub upload_order: u32,
    pub status: ImageStatus,
    /// Last extraction failure reason, if any.
    pub failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            PortfolioStatus::Processing,
            PortfolioStatus::Analyzed,
            PortfolioStatus::Failed,
        ] {
            assert_eq!(PortfolioStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(PortfolioStatus::parse("bogus"), None);
        assert_eq!(ImageStatus::parse("pending"), Some(ImageStatus::Pending));
    }
}
