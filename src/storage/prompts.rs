//! Prompt persistence.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::error::EngineResult;
use crate::types::PromptSpec;

/// A persisted prompt: the spec plus its rendered forms.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredPrompt {
    pub spec: PromptSpec,
    pub text: String,
    pub negative_text: String,
}

/// Store for `prompts`.
#[derive(Clone)]
pub struct PromptStore {
    db: super::Database,
}

impl PromptStore {
    pub fn new(db: super::Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, spec: &PromptSpec, text: &str, negative_text: &str) -> EngineResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO prompts (id, user_id, spec_json, text, negative_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                spec.id,
                spec.user_id,
                serde_json::to_string(spec)?,
                text,
                negative_text,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, prompt_id: &str) -> EngineResult<Option<StoredPrompt>> {
        let conn = self.db.connect()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT spec_json, text, negative_text FROM prompts WHERE id = ?1",
                params![prompt_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        match row {
            Some((spec_json, text, negative_text)) => Ok(Some(StoredPrompt {
                spec: serde_json::from_str(&spec_json)?,
                text,
                negative_text,
            })),
            None => Ok(None),
        }
    }

    /// Most recent first.
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> EngineResult<Vec<StoredPrompt>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT spec_json, text, negative_text FROM prompts
             WHERE user_id = ?1 ORDER BY created_at DESC, id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut prompts = Vec::new();
        for row in rows {
            let (spec_json, text, negative_text) = row?;
            prompts.push(StoredPrompt {
                spec: serde_json::from_str(&spec_json)?,
                text,
                negative_text,
            });
        }
        Ok(prompts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;

    #[test]
    fn test_insert_and_list() {
        let (_dir, db) = temp_db();
        let store = PromptStore::new(db);
        for i in 0..3 {
            let spec = PromptSpec {
                id: format!("p{i}"),
                user_id: "u1".into(),
                garment: Some("blazer".into()),
                ..Default::default()
            };
            store.insert(&spec, "text", "negative").unwrap();
        }
        let prompts = store.list_for_user("u1", 2).unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(store.get("p0").unwrap().is_some());
        assert!(store.get("missing").unwrap().is_none());
    }
}
