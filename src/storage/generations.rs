//! Generation persistence. Rows are append-only; the selector only
//! updates score and status.

use rusqlite::{params, OptionalExtension};

use crate::error::{EngineError, EngineResult};
use crate::types::{Generation, GenerationStatus};

/// Store for `generations`.
#[derive(Clone)]
pub struct GenerationStore {
    db: super::Database,
}

impl GenerationStore {
    pub fn new(db: super::Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, generation: &Generation) -> EngineResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO generations
             (id, user_id, prompt_id, generation_index, provider, url, width, height,
              cost_cents, quality_score, status, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                generation.id,
                generation.user_id,
                generation.prompt_id,
                generation.generation_index as i64,
                generation.provider,
                generation.url,
                generation.width,
                generation.height,
                generation.cost_cents,
                generation.quality_score,
                generation.status.as_str(),
                generation.error,
                generation.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, generation_id: &str) -> EngineResult<Option<Generation>> {
        let conn = self.db.connect()?;
        Ok(conn
            .query_row(
                &format!("{SELECT_SQL} WHERE id = ?1"),
                params![generation_id],
                row_to_generation,
            )
            .optional()?)
    }

    /// Fetch a generation, verifying ownership. Feedback on another
    /// user's generation is rejected here.
    pub fn get_owned(&self, generation_id: &str, user_id: &str) -> EngineResult<Generation> {
        let generation = self
            .get(generation_id)?
            .ok_or_else(|| EngineError::not_found(format!("generation {generation_id} not found")))?;
        if generation.user_id != user_id {
            return Err(EngineError::not_found(format!(
                "generation {generation_id} not found"
            )));
        }
        Ok(generation)
    }

    pub fn set_score(
        &self,
        generation_id: &str,
        quality_score: f64,
        status: GenerationStatus,
    ) -> EngineResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE generations SET quality_score = ?2, status = ?3 WHERE id = ?1",
            params![generation_id, quality_score, status.as_str()],
        )?;
        Ok(())
    }

    /// Most recent first.
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> EngineResult<Vec<Generation>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_SQL} WHERE user_id = ?1 ORDER BY created_at DESC, id LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user_id, limit as i64], row_to_generation)?;
        let mut generations = Vec::new();
        for row in rows {
            generations.push(row?);
        }
        Ok(generations)
    }
}

const SELECT_SQL: &str = "SELECT id, user_id, prompt_id, generation_index, provider, url, width,
        height, cost_cents, quality_score, status, error, created_at FROM generations";

fn row_to_generation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Generation> {
    let status: String = row.get(10)?;
    let created: String = row.get(12)?;
    Ok(Generation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        prompt_id: row.get(2)?,
        generation_index: row.get::<_, i64>(3)? as usize,
        provider: row.get(4)?,
        url: row.get(5)?,
        width: row.get::<_, i64>(6)? as u32,
        height: row.get::<_, i64>(7)? as u32,
        cost_cents: row.get::<_, i64>(8)? as u32,
        quality_score: row.get(9)?,
        status: GenerationStatus::parse(&status).unwrap_or(GenerationStatus::Failed),
        error: row.get(11)?,
        created_at: super::portfolios::parse_ts(&created),
    })
}
