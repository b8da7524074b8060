//! Descriptor and correction persistence.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::error::EngineResult;
use crate::types::{Descriptor, DescriptorCorrection};

/// Store for `descriptors` and `descriptor_corrections`.
#[derive(Clone)]
pub struct DescriptorStore {
    db: super::Database,
}

impl DescriptorStore {
    pub fn new(db: super::Database) -> Self {
        Self { db }
    }

    /// Replace (never append) the descriptor for an image.
    pub fn replace(
        &self,
        image_id: &str,
        portfolio_id: &str,
        descriptor: &Descriptor,
    ) -> EngineResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO descriptors
             (image_id, portfolio_id, descriptor_json, confidence, completeness,
              prompt_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                image_id,
                portfolio_id,
                serde_json::to_string(descriptor)?,
                descriptor.metadata.overall_confidence,
                descriptor.metadata.completeness_percentage,
                descriptor.metadata.prompt_version,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, image_id: &str) -> EngineResult<Option<Descriptor>> {
        let conn = self.db.connect()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT descriptor_json FROM descriptors WHERE image_id = ?1",
                params![image_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// All descriptors of a portfolio, insertion order.
    pub fn list_for_portfolio(&self, portfolio_id: &str) -> EngineResult<Vec<Descriptor>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT descriptor_json FROM descriptors
             WHERE portfolio_id = ?1 ORDER BY created_at, image_id",
        )?;
        let rows = stmt.query_map(params![portfolio_id], |row| row.get::<_, String>(0))?;
        let mut descriptors = Vec::new();
        for row in rows {
            descriptors.push(serde_json::from_str(&row?)?);
        }
        Ok(descriptors)
    }

    pub fn record_corrections(
        &self,
        image_id: &str,
        portfolio_id: &str,
        corrections: &[DescriptorCorrection],
    ) -> EngineResult<()> {
        if corrections.is_empty() {
            return Ok(());
        }
        let mut conn = self.db.connect()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for c in corrections {
            tx.execute(
                "INSERT INTO descriptor_corrections
                 (image_id, portfolio_id, field_path, ai_value, corrected_value, rule_id,
                  created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    image_id,
                    portfolio_id,
                    c.field_path,
                    c.ai_value,
                    c.corrected_value,
                    c.rule_id,
                    now
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_corrections(
        &self,
        portfolio_id: &str,
    ) -> EngineResult<Vec<DescriptorCorrection>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT field_path, ai_value, corrected_value, rule_id
             FROM descriptor_corrections WHERE portfolio_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![portfolio_id], |row| {
            Ok(DescriptorCorrection {
                field_path: row.get(0)?,
                ai_value: row.get(1)?,
                corrected_value: row.get(2)?,
                rule_id: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;
    use crate::storage::PortfolioStore;

    fn seeded_image(db: &crate::storage::Database) -> (String, String) {
        let portfolios = PortfolioStore::new(db.clone());
        let p = portfolios.create("u1").unwrap();
        let img = portfolios
            .insert_image(&p.id, "k/a.jpg", "h1", 0)
            .unwrap()
            .unwrap();
        (p.id, img.id)
    }

    #[test]
    fn test_replace_keeps_single_descriptor_per_image() {
        let (_dir, db) = temp_db();
        let (portfolio_id, image_id) = seeded_image(&db);
        let store = DescriptorStore::new(db);

        let mut d = Descriptor::default();
        d.executive_summary = "first".into();
        store.replace(&image_id, &portfolio_id, &d).unwrap();
        d.executive_summary = "second".into();
        store.replace(&image_id, &portfolio_id, &d).unwrap();

        let all = store.list_for_portfolio(&portfolio_id).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].executive_summary, "second");
        assert_eq!(
            store.get(&image_id).unwrap().unwrap().executive_summary,
            "second"
        );
    }

    #[test]
    fn test_corrections_audit_trail() {
        let (_dir, db) = temp_db();
        let (portfolio_id, image_id) = seeded_image(&db);
        let store = DescriptorStore::new(db);
        store
            .record_corrections(
                &image_id,
                &portfolio_id,
                &[DescriptorCorrection {
                    field_path: "garments[0].type".into(),
                    ai_value: "blazer".into(),
                    corrected_value: "shirt jacket".into(),
                    rule_id: "blazer_shirt_collar".into(),
                }],
            )
            .unwrap();
        let corrections = store.list_corrections(&portfolio_id).unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].rule_id, "blazer_shirt_collar");
    }
}
