//! Portfolio and portfolio-image persistence.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::types::{ImageStatus, Portfolio, PortfolioImage, PortfolioStatus};

/// Store for `portfolios` and `portfolio_images`.
#[derive(Clone)]
pub struct PortfolioStore {
    db: super::Database,
}

impl PortfolioStore {
    pub fn new(db: super::Database) -> Self {
        Self { db }
    }

    /// Create a portfolio in `processing` state and make it the user's
    /// active one, demoting any predecessor to dormant.
    pub fn create(&self, user_id: &str) -> EngineResult<Portfolio> {
        let conn = self.db.connect()?;
        self.db.ensure_user(&conn, user_id)?;
        let now = Utc::now();
        let portfolio = Portfolio {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            status: PortfolioStatus::Processing,
            active: true,
            created_at: now,
            updated_at: now,
        };
        conn.execute(
            "UPDATE portfolios SET active = 0, updated_at = ?2 WHERE user_id = ?1 AND active = 1",
            params![user_id, now.to_rfc3339()],
        )?;
        conn.execute(
            "INSERT INTO portfolios (id, user_id, status, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)",
            params![
                portfolio.id,
                user_id,
                portfolio.status.as_str(),
                now.to_rfc3339()
            ],
        )?;
        Ok(portfolio)
    }

    pub fn get(&self, portfolio_id: &str) -> EngineResult<Portfolio> {
        let conn = self.db.connect()?;
        conn.query_row(
            "SELECT id, user_id, status, active, created_at, updated_at
             FROM portfolios WHERE id = ?1",
            params![portfolio_id],
            row_to_portfolio,
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("portfolio {portfolio_id} not found")))
    }

    /// The user's active portfolio, if any.
    pub fn active_for(&self, user_id: &str) -> EngineResult<Option<Portfolio>> {
        let conn = self.db.connect()?;
        Ok(conn
            .query_row(
                "SELECT id, user_id, status, active, created_at, updated_at
                 FROM portfolios WHERE user_id = ?1 AND active = 1",
                params![user_id],
                row_to_portfolio,
            )
            .optional()?)
    }

    pub fn set_status(&self, portfolio_id: &str, status: PortfolioStatus) -> EngineResult<()> {
        let conn = self.db.connect()?;
        let n = conn.execute(
            "UPDATE portfolios SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![portfolio_id, status.as_str(), Utc::now().to_rfc3339()],
        )?;
        if n == 0 {
            return Err(EngineError::not_found(format!(
                "portfolio {portfolio_id} not found"
            )));
        }
        Ok(())
    }

    /// Whether the portfolio is still the active one for its user.
    /// Ingestion checks this to cancel superseded runs.
    pub fn is_active(&self, portfolio_id: &str) -> EngineResult<bool> {
        let conn = self.db.connect()?;
        let active: Option<i64> = conn
            .query_row(
                "SELECT active FROM portfolios WHERE id = ?1",
                params![portfolio_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(active == Some(1))
    }

    /// Insert an image unless its content hash is already present in
    /// the portfolio. Returns None for duplicates.
    pub fn insert_image(
        &self,
        portfolio_id: &str,
        storage_key: &str,
        content_hash: &str,
        upload_order: u32,
    ) -> EngineResult<Option<PortfolioImage>> {
        let conn = self.db.connect()?;
        let image = PortfolioImage {
            id: Uuid::new_v4().to_string(),
            portfolio_id: portfolio_id.to_string(),
            storage_key: storage_key.to_string(),
            content_hash: content_hash.to_string(),
            upload_order,
            status: ImageStatus::Pending,
            failure_reason: None,
        };
        let n = conn.execute(
            "INSERT OR IGNORE INTO portfolio_images
             (id, portfolio_id, storage_key, content_hash, upload_order, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                image.id,
                portfolio_id,
                storage_key,
                content_hash,
                upload_order,
                image.status.as_str()
            ],
        )?;
        Ok(if n == 0 { None } else { Some(image) })
    }

    pub fn list_images(&self, portfolio_id: &str) -> EngineResult<Vec<PortfolioImage>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, portfolio_id, storage_key, content_hash, upload_order, status,
                    failure_reason
             FROM portfolio_images WHERE portfolio_id = ?1 ORDER BY upload_order",
        )?;
        let rows = stmt.query_map(params![portfolio_id], row_to_image)?;
        let mut images = Vec::new();
        for row in rows {
            images.push(row?);
        }
        Ok(images)
    }

    pub fn set_image_status(
        &self,
        image_id: &str,
        status: ImageStatus,
        failure_reason: Option<&str>,
    ) -> EngineResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE portfolio_images SET status = ?2, failure_reason = ?3 WHERE id = ?1",
            params![image_id, status.as_str(), failure_reason],
        )?;
        Ok(())
    }

    /// Content hashes already present in a portfolio, for additive
    /// ingestion dedupe.
    pub fn existing_hashes(&self, portfolio_id: &str) -> EngineResult<Vec<String>> {
        let conn = self.db.connect()?;
        let mut stmt = conn
            .prepare("SELECT content_hash FROM portfolio_images WHERE portfolio_id = ?1")?;
        let rows = stmt.query_map(params![portfolio_id], |row| row.get::<_, String>(0))?;
        let mut hashes = Vec::new();
        for row in rows {
            hashes.push(row?);
        }
        Ok(hashes)
    }

    /// Count of images by status, used for the terminal-state decision.
    pub fn count_by_status(&self, portfolio_id: &str, status: ImageStatus) -> EngineResult<u32> {
        let conn = self.db.connect()?;
        let n: i64 = conn.query_row(
            "SELECT count(*) FROM portfolio_images WHERE portfolio_id = ?1 AND status = ?2",
            params![portfolio_id, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as u32)
    }
}

fn row_to_portfolio(row: &rusqlite::Row<'_>) -> rusqlite::Result<Portfolio> {
    let status: String = row.get(2)?;
    let active: i64 = row.get(3)?;
    let created: String = row.get(4)?;
    let updated: String = row.get(5)?;
    Ok(Portfolio {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status: PortfolioStatus::parse(&status).unwrap_or(PortfolioStatus::Failed),
        active: active == 1,
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
    })
}

fn row_to_image(row: &rusqlite::Row<'_>) -> rusqlite::Result<PortfolioImage> {
    let status: String = row.get(5)?;
    Ok(PortfolioImage {
        id: row.get(0)?,
        portfolio_id: row.get(1)?,
        storage_key: row.get(2)?,
        content_hash: row.get(3)?,
        upload_order: row.get::<_, i64>(4)? as u32,
        status: ImageStatus::parse(&status).unwrap_or(ImageStatus::Failed),
        failure_reason: row.get(6)?,
    })
}

pub(crate) fn parse_ts(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            log::warn!("STORAGE: unparseable timestamp {s:?}, substituting now");
            Utc::now()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_db;

    #[test]
    fn test_create_supersedes_previous_active() {
        let (_dir, db) = temp_db();
        let store = PortfolioStore::new(db);
        let first = store.create("u1").unwrap();
        let second = store.create("u1").unwrap();
        assert!(!store.is_active(&first.id).unwrap());
        assert!(store.is_active(&second.id).unwrap());
        assert_eq!(store.active_for("u1").unwrap().unwrap().id, second.id);
    }

    #[test]
    fn test_duplicate_hash_dropped() {
        let (_dir, db) = temp_db();
        let store = PortfolioStore::new(db);
        let p = store.create("u1").unwrap();
        let a = store.insert_image(&p.id, "k/a.jpg", "hash1", 0).unwrap();
        let b = store.insert_image(&p.id, "k/b.jpg", "hash1", 1).unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
        assert_eq!(store.list_images(&p.id).unwrap().len(), 1);
    }

    #[test]
    fn test_image_status_updates() {
        let (_dir, db) = temp_db();
        let store = PortfolioStore::new(db);
        let p = store.create("u1").unwrap();
        let img = store
            .insert_image(&p.id, "k/a.jpg", "hash1", 0)
            .unwrap()
            .unwrap();
        store
            .set_image_status(&img.id, ImageStatus::Failed, Some("parse error"))
            .unwrap();
        let images = store.list_images(&p.id).unwrap();
        assert_eq!(images[0].status, ImageStatus::Failed);
        assert_eq!(images[0].failure_reason.as_deref(), Some("parse error"));
        assert_eq!(store.count_by_status(&p.id, ImageStatus::Failed).unwrap(), 1);
    }
}
