//! Coverage-report and attribute-gap persistence.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::selection::coverage::{AttributeGap, CoverageReport};

/// Store for `coverage_reports` and `attribute_gaps`.
#[derive(Clone)]
pub struct CoverageStore {
    db: super::Database,
}

impl CoverageStore {
    pub fn new(db: super::Database) -> Self {
        Self { db }
    }

    /// Persist a selection's coverage report and its gaps. Fresh gaps
    /// replace any unconsumed predecessors so boosts never stack across
    /// batches.
    pub fn record(&self, user_id: &str, report: &CoverageReport) -> EngineResult<()> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO coverage_reports
             (id, user_id, selected_ids_json, per_slot_json, diversity_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                user_id,
                serde_json::to_string(&report.selected_ids)?,
                serde_json::to_string(&report.per_slot_coverage)?,
                report.diversity_score,
                now
            ],
        )?;
        tx.execute(
            "DELETE FROM attribute_gaps WHERE user_id = ?1 AND consumed = 0",
            params![user_id],
        )?;
        for gap in &report.gaps {
            tx.execute(
                "INSERT INTO attribute_gaps
                 (id, user_id, slot, uncovered_values_json, severity, recommended_boost,
                  consumed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    user_id,
                    gap.slot.as_str(),
                    serde_json::to_string(&gap.uncovered_values)?,
                    gap.severity,
                    gap.recommended_boost,
                    now
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Unconsumed gaps for a user, read by the prompt builder.
    pub fn active_gaps(&self, user_id: &str) -> EngineResult<Vec<AttributeGap>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT slot, uncovered_values_json, severity, recommended_boost
             FROM attribute_gaps WHERE user_id = ?1 AND consumed = 0 ORDER BY severity DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;
        let mut gaps = Vec::new();
        for row in rows {
            let (slot, uncovered_json, severity, boost) = row?;
            let Some(slot) = crate::types::AttributeSlot::parse(&slot) else {
                continue;
            };
            gaps.push(AttributeGap {
                slot,
                uncovered_values: serde_json::from_str(&uncovered_json)?,
                severity,
                recommended_boost: boost,
            });
        }
        Ok(gaps)
    }

    /// Mark all of a user's gaps consumed once a prompt build applied
    /// their boosts.
    pub fn consume_gaps(&self, user_id: &str) -> EngineResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE attribute_gaps SET consumed = 1 WHERE user_id = ?1 AND consumed = 0",
            params![user_id],
        )?;
        Ok(())
    }

    /// Latest report for the read-only projection.
    pub fn latest_report(
        &self,
        user_id: &str,
    ) -> EngineResult<Option<(Vec<String>, serde_json::Value, f64)>> {
        let conn = self.db.connect()?;
        let row = conn
            .query_row(
                "SELECT selected_ids_json, per_slot_json, diversity_score
                 FROM coverage_reports WHERE user_id = ?1
                 ORDER BY created_at DESC, id LIMIT 1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;
        match row {
            Some((ids, per_slot, score)) => Ok(Some((
                serde_json::from_str(&ids)?,
                serde_json::from_str(&per_slot)?,
                score,
            ))),
            None => Ok(None),
        }
    }
}
