//! RLHF token-weight persistence and the per-update audit log.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::error::EngineResult;

/// One persisted token weight.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenWeightRow {
    pub category: String,
    pub token: String,
    pub weight: f64,
    pub updates: u32,
}

/// Store for `rlhf_token_weights` and `rlhf_feedback_log`.
#[derive(Clone)]
pub struct RlhfWeightStore {
    db: super::Database,
}

impl RlhfWeightStore {
    pub fn new(db: super::Database) -> Self {
        Self { db }
    }

    pub fn get(&self, user_id: &str, category: &str, token: &str) -> EngineResult<Option<f64>> {
        let conn = self.db.connect()?;
        Ok(conn
            .query_row(
                "SELECT weight FROM rlhf_token_weights
                 WHERE user_id = ?1 AND category = ?2 AND token = ?3",
                params![user_id, category, token],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn weights_for_category(
        &self,
        user_id: &str,
        category: &str,
    ) -> EngineResult<Vec<TokenWeightRow>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT category, token, weight, updates FROM rlhf_token_weights
             WHERE user_id = ?1 AND category = ?2 ORDER BY weight DESC, token",
        )?;
        let rows = stmt.query_map(params![user_id, category], row_to_weight)?;
        collect(rows)
    }

    pub fn all_weights(&self, user_id: &str) -> EngineResult<Vec<TokenWeightRow>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT category, token, weight, updates FROM rlhf_token_weights
             WHERE user_id = ?1 ORDER BY category, weight DESC, token",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_weight)?;
        collect(rows)
    }

    /// Upsert the weight after an EMA step, logging the transition.
    /// One transaction per event keeps the log and the table agreeing.
    pub fn set_weight(
        &self,
        event_id: &str,
        user_id: &str,
        category: &str,
        token: &str,
        reward: f64,
        weight_before: f64,
        weight_after: f64,
    ) -> EngineResult<()> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO rlhf_token_weights (user_id, category, token, weight, updates)
             VALUES (?1, ?2, ?3, ?4, 1)
             ON CONFLICT(user_id, category, token)
             DO UPDATE SET weight = ?4, updates = updates + 1",
            params![user_id, category, token, weight_after],
        )?;
        tx.execute(
            "INSERT INTO rlhf_feedback_log
             (event_id, user_id, category, token, reward, weight_before, weight_after,
              created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event_id,
                user_id,
                category,
                token,
                reward,
                weight_before,
                weight_after,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Log rows for one event, for tests and audits.
    pub fn log_for_event(&self, event_id: &str) -> EngineResult<Vec<(String, String, f64)>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT category, token, reward FROM rlhf_feedback_log
             WHERE event_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![event_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_weight(row: &rusqlite::Row<'_>) -> rusqlite::Result<TokenWeightRow> {
    Ok(TokenWeightRow {
        category: row.get(0)?,
        token: row.get(1)?,
        weight: row.get(2)?,
        updates: row.get::<_, i64>(3)? as u32,
    })
}

fn collect(
    rows: rusqlite::MappedRows<
        '_,
        impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<TokenWeightRow>,
    >,
) -> EngineResult<Vec<TokenWeightRow>> {
    let mut weights = Vec::new();
    for row in rows {
        weights.push(row?);
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;

    #[test]
    fn test_upsert_no_duplicates() {
        let (_dir, db) = temp_db();
        let store = RlhfWeightStore::new(db);
        store
            .set_weight("e1", "u1", "lighting", "softbox", 1.0, 1.0, 1.1)
            .unwrap();
        store
            .set_weight("e2", "u1", "lighting", "softbox", 1.0, 1.1, 1.19)
            .unwrap();
        let weights = store.weights_for_category("u1", "lighting").unwrap();
        assert_eq!(weights.len(), 1);
        assert!((weights[0].weight - 1.19).abs() < 1e-9);
        assert_eq!(weights[0].updates, 2);
    }

    #[test]
    fn test_schema_rejects_out_of_range_weight() {
        let (_dir, db) = temp_db();
        let conn = db.connect().unwrap();
        let result = conn.execute(
            "INSERT INTO rlhf_token_weights (user_id, category, token, weight)
             VALUES ('u', 'mood', 'serene', 2.5)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_feedback_log_records_transitions() {
        let (_dir, db) = temp_db();
        let store = RlhfWeightStore::new(db);
        store
            .set_weight("e1", "u1", "style", "tailored", 1.5, 1.0, 1.05)
            .unwrap();
        let log = store.log_for_event("e1").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "style");
        assert!((log[0].2 - 1.5).abs() < 1e-9);
    }
}
