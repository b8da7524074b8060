//! Feedback events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::UserId;

/// The kinds of user signal the engine learns from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Like,
    Dislike,
    Save,
    Share,
    GenerateSimilar,
    Delete,
    /// Free-text critique; payload carries the text.
    Critique,
    /// Implicit dwell time; payload carries milliseconds.
    ImpressionMs,
    /// Implicit swipe; payload carries the direction.
    Swipe,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
            Self::Save => "save",
            Self::Share => "share",
            Self::GenerateSimilar => "generate_similar",
            Self::Delete => "delete",
            Self::Critique => "critique",
            Self::ImpressionMs => "impression_ms",
            Self::Swipe => "swipe",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "dislike" => Some(Self::Dislike),
            "save" => Some(Self::Save),
            "share" => Some(Self::Share),
            "generate_similar" => Some(Self::GenerateSimilar),
            "delete" => Some(Self::Delete),
            "critique" => Some(Self::Critique),
            "impression_ms" => Some(Self::ImpressionMs),
            "swipe" => Some(Self::Swipe),
            _ => None,
        }
    }

    /// Whether the signal comes from deliberate user action rather than
    /// passive interaction.
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Self::ImpressionMs | Self::Swipe)
    }
}

/// Append-only record of one user signal about one generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Unique id; replays of the same id are rejected.
    pub event_id: String,
    pub user_id: UserId,
    pub generation_id: String,
    pub kind: FeedbackKind,
    /// Kind-specific payload: critique text, impression milliseconds,
    /// swipe direction.
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl FeedbackEvent {
    /// Impression duration when this is an `impression_ms` event.
    pub fn impression_ms(&self) -> Option<u64> {
        if self.kind != FeedbackKind::ImpressionMs {
            return None;
        }
        self.payload
            .as_u64()
            .or_else(|| self.payload.get("ms").and_then(Value::as_u64))
    }

    /// Critique text when this is a `critique` event.
    pub fn critique_text(&self) -> Option<&str> {
        if self.kind != FeedbackKind::Critique {
            return None;
        }
        self.payload
            .as_str()
            .or_else(|| self.payload.get("text").and_then(Value::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: FeedbackKind, payload: Value) -> FeedbackEvent {
        FeedbackEvent {
            event_id: "e1".into(),
            user_id: "u1".into(),
            generation_id: "g1".into(),
            kind,
            payload,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_impression_payload_forms() {
        let e = event(FeedbackKind::ImpressionMs, serde_json::json!(4200));
        assert_eq!(e.impression_ms(), Some(4200));
        let e = event(FeedbackKind::ImpressionMs, serde_json::json!({"ms": 900}));
        assert_eq!(e.impression_ms(), Some(900));
        let e = event(FeedbackKind::Like, serde_json::json!(4200));
        assert_eq!(e.impression_ms(), None);
    }

    #[test]
    fn test_critique_payload_forms() {
        let e = event(FeedbackKind::Critique, serde_json::json!("make sleeves longer"));
        assert_eq!(e.critique_text(), Some("make sleeves longer"));
        let e = event(
            FeedbackKind::Critique,
            serde_json::json!({"text": "less shine"}),
        );
        assert_eq!(e.critique_text(), Some("less shine"));
    }

    #[test]
    fn test_explicit_classification() {
        assert!(FeedbackKind::Like.is_explicit());
        assert!(FeedbackKind::Critique.is_explicit());
        assert!(!FeedbackKind::ImpressionMs.is_explicit());
        assert!(!FeedbackKind::Swipe.is_explicit());
    }
}
