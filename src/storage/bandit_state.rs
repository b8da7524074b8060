//! Bandit posterior persistence.
//!
//! Normalized (user, slot, value, alpha, beta) rows with the α≥1 / β≥1
//! floor enforced both here and by a schema CHECK. Updates are
//! transactional upserts, so concurrent feedback never produces a row
//! below the floor.

use rusqlite::params;

use crate::error::EngineResult;

/// One persisted posterior.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BanditArmRow {
    pub slot: String,
    pub value: String,
    pub alpha: f64,
    pub beta: f64,
    /// Times this value was chosen into a prompt.
    pub pulls: u32,
}

/// Store for `bandit_state`.
#[derive(Clone)]
pub struct BanditStateStore {
    db: super::Database,
}

impl BanditStateStore {
    pub fn new(db: super::Database) -> Self {
        Self { db }
    }

    pub fn arms_for_slot(&self, user_id: &str, slot: &str) -> EngineResult<Vec<BanditArmRow>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT slot, value, alpha, beta, pulls FROM bandit_state
             WHERE user_id = ?1 AND slot = ?2 ORDER BY value",
        )?;
        let rows = stmt.query_map(params![user_id, slot], row_to_arm)?;
        collect(rows)
    }

    pub fn all_arms(&self, user_id: &str) -> EngineResult<Vec<BanditArmRow>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT slot, value, alpha, beta, pulls FROM bandit_state
             WHERE user_id = ?1 ORDER BY slot, value",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_arm)?;
        collect(rows)
    }

    /// Seed an arm at the uniform prior if it does not exist yet.
    pub fn ensure_arm(
        &self,
        user_id: &str,
        slot: &str,
        value: &str,
        floor: f64,
    ) -> EngineResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO bandit_state (user_id, slot, value, alpha, beta, pulls)
             VALUES (?1, ?2, ?3, ?4, ?4, 0)",
            params![user_id, slot, value, floor.max(1.0)],
        )?;
        Ok(())
    }

    /// Apply a reward to one arm. Positive rewards raise alpha,
    /// negative rewards raise beta; both stay at or above the floor.
    pub fn apply_reward(
        &self,
        user_id: &str,
        slot: &str,
        value: &str,
        reward: f64,
        floor: f64,
    ) -> EngineResult<()> {
        let floor = floor.max(1.0);
        let (da, db_) = if reward >= 0.0 {
            (reward, 0.0)
        } else {
            (0.0, reward.abs())
        };
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO bandit_state (user_id, slot, value, alpha, beta, pulls)
             VALUES (?1, ?2, ?3, ?4, ?4, 0)",
            params![user_id, slot, value, floor],
        )?;
        tx.execute(
            "UPDATE bandit_state
             SET alpha = max(alpha + ?4, ?6), beta = max(beta + ?5, ?6)
             WHERE user_id = ?1 AND slot = ?2 AND value = ?3",
            params![user_id, slot, value, da, db_, floor],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Count a selection of this value into a prompt.
    pub fn record_pull(&self, user_id: &str, slot: &str, value: &str) -> EngineResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE bandit_state SET pulls = pulls + 1
             WHERE user_id = ?1 AND slot = ?2 AND value = ?3",
            params![user_id, slot, value],
        )?;
        Ok(())
    }
}

fn row_to_arm(row: &rusqlite::Row<'_>) -> rusqlite::Result<BanditArmRow> {
    Ok(BanditArmRow {
        slot: row.get(0)?,
        value: row.get(1)?,
        alpha: row.get(2)?,
        beta: row.get(3)?,
        pulls: row.get::<_, i64>(4)? as u32,
    })
}

fn collect(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<BanditArmRow>>,
) -> EngineResult<Vec<BanditArmRow>> {
    let mut arms = Vec::new();
    for row in rows {
        arms.push(row?);
    }
    Ok(arms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;

    #[test]
    fn test_reward_updates_respect_floor() {
        let (_dir, db) = temp_db();
        let store = BanditStateStore::new(db);
        store
            .apply_reward("u1", "garment", "blazer", 0.3, 1.0)
            .unwrap();
        store
            .apply_reward("u1", "garment", "blazer", -0.1, 1.0)
            .unwrap();
        let arms = store.arms_for_slot("u1", "garment").unwrap();
        assert_eq!(arms.len(), 1);
        assert!((arms[0].alpha - 1.3).abs() < 1e-9);
        assert!((arms[0].beta - 1.1).abs() < 1e-9);
        assert!(arms[0].alpha >= 1.0 && arms[0].beta >= 1.0);
    }

    #[test]
    fn test_ensure_arm_is_idempotent() {
        let (_dir, db) = temp_db();
        let store = BanditStateStore::new(db);
        store.ensure_arm("u1", "fabric", "cotton twill", 1.0).unwrap();
        store
            .apply_reward("u1", "fabric", "cotton twill", 0.5, 1.0)
            .unwrap();
        store.ensure_arm("u1", "fabric", "cotton twill", 1.0).unwrap();
        let arms = store.arms_for_slot("u1", "fabric").unwrap();
        assert!((arms[0].alpha - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_pull_counter() {
        let (_dir, db) = temp_db();
        let store = BanditStateStore::new(db);
        store.ensure_arm("u1", "color", "navy", 1.0).unwrap();
        store.record_pull("u1", "color", "navy").unwrap();
        store.record_pull("u1", "color", "navy").unwrap();
        assert_eq!(store.all_arms("u1").unwrap()[0].pulls, 2);
    }
}
