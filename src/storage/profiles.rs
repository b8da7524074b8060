//! Style-profile persistence. One row per user, atomic replacement.

use rusqlite::{params, OptionalExtension};

use crate::error::EngineResult;
use crate::types::StyleProfile;

/// Store for `style_profiles`.
#[derive(Clone)]
pub struct ProfileStore {
    db: super::Database,
}

impl ProfileStore {
    pub fn new(db: super::Database) -> Self {
        Self { db }
    }

    /// Atomically replace the user's profile row. Readers never see a
    /// partial profile: the row swap happens in one statement.
    pub fn replace(&self, profile: &StyleProfile) -> EngineResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO style_profiles
             (user_id, portfolio_id, profile_json, total_images, avg_confidence,
              avg_completeness, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                profile.user_id,
                profile.portfolio_id,
                serde_json::to_string(profile)?,
                profile.total_images,
                profile.avg_confidence,
                profile.avg_completeness,
                profile
                    .generated_at
                    .unwrap_or_else(chrono::Utc::now)
                    .to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, user_id: &str) -> EngineResult<Option<StyleProfile>> {
        let conn = self.db.connect()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT profile_json FROM style_profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Drop the cached profile so the next read forces re-aggregation.
    /// Called when new images land or a portfolio is superseded.
    pub fn invalidate(&self, user_id: &str) -> EngineResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "DELETE FROM style_profiles WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;

    #[test]
    fn test_replace_and_invalidate() {
        let (_dir, db) = temp_db();
        let store = ProfileStore::new(db);
        let mut profile = StyleProfile {
            user_id: "u1".into(),
            portfolio_id: "p1".into(),
            total_images: 5,
            avg_confidence: 0.9,
            avg_completeness: 80.0,
            ..Default::default()
        };
        store.replace(&profile).unwrap();
        profile.total_images = 7;
        store.replace(&profile).unwrap();
        assert_eq!(store.get("u1").unwrap().unwrap().total_images, 7);

        store.invalidate("u1").unwrap();
        assert!(store.get("u1").unwrap().is_none());
    }

    #[test]
    fn test_clamp_contract_enforced_by_schema() {
        let (_dir, db) = temp_db();
        let store = ProfileStore::new(db);
        let profile = StyleProfile {
            user_id: "u1".into(),
            portfolio_id: "p1".into(),
            avg_confidence: 12.0, // out of DECIMAL(4,3) range
            ..Default::default()
        };
        assert!(store.replace(&profile).is_err());
    }
}
