//! Append-only interaction-event intake.
//!
//! Every feedback event lands here first; the PRIMARY KEY on `event_id`
//! is the replay guard. Processing is driven off the insert result:
//! a duplicate insert means the event was already applied.

use rusqlite::params;

use crate::error::EngineResult;
use crate::types::FeedbackEvent;

/// Store for `interaction_events`.
#[derive(Clone)]
pub struct FeedbackLogStore {
    db: super::Database,
}

impl FeedbackLogStore {
    pub fn new(db: super::Database) -> Self {
        Self { db }
    }

    /// Record an event. Returns false when the event id was already
    /// seen, in which case the caller must not re-apply it.
    pub fn record(&self, event: &FeedbackEvent) -> EngineResult<bool> {
        let conn = self.db.connect()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO interaction_events
             (event_id, user_id, generation_id, kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.event_id,
                event.user_id,
                event.generation_id,
                event.kind.as_str(),
                serde_json::to_string(&event.payload)?,
                event.created_at.to_rfc3339(),
            ],
        )?;
        Ok(n > 0)
    }

    /// Count of recorded events for a user.
    pub fn count_for_user(&self, user_id: &str) -> EngineResult<u32> {
        let conn = self.db.connect()?;
        let n: i64 = conn.query_row(
            "SELECT count(*) FROM interaction_events WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(n as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;
    use crate::types::FeedbackKind;

    #[test]
    fn test_replay_detected() {
        let (_dir, db) = temp_db();
        let store = FeedbackLogStore::new(db);
        let event = FeedbackEvent {
            event_id: "e1".into(),
            user_id: "u1".into(),
            generation_id: "g1".into(),
            kind: FeedbackKind::Like,
            payload: serde_json::Value::Null,
            created_at: chrono::Utc::now(),
        };
        assert!(store.record(&event).unwrap());
        assert!(!store.record(&event).unwrap());
        assert_eq!(store.count_for_user("u1").unwrap(), 1);
    }
}
