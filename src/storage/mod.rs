//! SQLite persistence.
//!
//! One [`Database`] handle (a path) is shared by store structs that each
//! own a table family. Connections are opened per operation; async
//! callers go through `spawn_blocking`. JSON-shaped columns are TEXT via
//! serde_json. All tables are created idempotently by [`Database::migrate`].

pub mod bandit_state;
pub mod coverage;
pub mod descriptors;
pub mod feedback_log;
pub mod generations;
pub mod portfolios;
pub mod profiles;
pub mod prompts;
pub mod rlhf_weights;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;

use crate::error::EngineResult;

pub use bandit_state::BanditStateStore;
pub use coverage::CoverageStore;
pub use descriptors::DescriptorStore;
pub use feedback_log::FeedbackLogStore;
pub use generations::GenerationStore;
pub use portfolios::PortfolioStore;
pub use profiles::ProfileStore;
pub use prompts::PromptStore;
pub use rlhf_weights::RlhfWeightStore;

/// Shared handle to the engine database.
#[derive(Debug, Clone)]
pub struct Database {
    path: Arc<PathBuf>,
}

impl Database {
    /// Open (creating parent directories) and migrate the database at
    /// `path`.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Self {
            path: Arc::new(path),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open a fresh connection. Foreign keys are enforced per
    /// connection in SQLite.
    pub fn connect(&self) -> EngineResult<Connection> {
        let conn = Connection::open(self.path.as_ref())?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(conn)
    }

    /// Run a blocking closure against a fresh connection on the
    /// blocking pool.
    pub async fn with_conn<T, F>(&self, f: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> EngineResult<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.connect()?;
            f(&conn)
        })
        .await
        .map_err(|e| crate::error::EngineError::Io(std::io::Error::other(e)))?
    }

    /// Create all tables. Idempotent; called on startup.
    pub fn migrate(&self) -> EngineResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS portfolios (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_portfolios_user
                ON portfolios(user_id, active);
            CREATE TABLE IF NOT EXISTS portfolio_images (
                id TEXT PRIMARY KEY,
                portfolio_id TEXT NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
                storage_key TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                upload_order INTEGER NOT NULL,
                status TEXT NOT NULL,
                failure_reason TEXT,
                UNIQUE(portfolio_id, content_hash)
            );
            CREATE TABLE IF NOT EXISTS descriptors (
                image_id TEXT PRIMARY KEY
                    REFERENCES portfolio_images(id) ON DELETE CASCADE,
                portfolio_id TEXT NOT NULL,
                descriptor_json TEXT NOT NULL,
                confidence REAL NOT NULL,
                completeness REAL NOT NULL,
                prompt_version TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_descriptors_portfolio
                ON descriptors(portfolio_id);
            CREATE TABLE IF NOT EXISTS descriptor_corrections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_id TEXT NOT NULL,
                portfolio_id TEXT NOT NULL,
                field_path TEXT NOT NULL,
                ai_value TEXT NOT NULL,
                corrected_value TEXT NOT NULL,
                rule_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS style_profiles (
                user_id TEXT PRIMARY KEY,
                portfolio_id TEXT NOT NULL,
                profile_json TEXT NOT NULL,
                total_images INTEGER NOT NULL,
                avg_confidence REAL NOT NULL CHECK (avg_confidence BETWEEN 0 AND 9.999),
                avg_completeness REAL NOT NULL CHECK (avg_completeness BETWEEN 0 AND 999.99),
                generated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS prompts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                spec_json TEXT NOT NULL,
                text TEXT NOT NULL,
                negative_text TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_prompts_user ON prompts(user_id);
            CREATE TABLE IF NOT EXISTS generations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                prompt_id TEXT NOT NULL,
                generation_index INTEGER NOT NULL,
                provider TEXT NOT NULL,
                url TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                cost_cents INTEGER NOT NULL CHECK (cost_cents >= 0),
                quality_score REAL,
                status TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_generations_user
                ON generations(user_id, created_at);
            CREATE TABLE IF NOT EXISTS bandit_state (
                user_id TEXT NOT NULL,
                slot TEXT NOT NULL,
                value TEXT NOT NULL,
                alpha REAL NOT NULL CHECK (alpha >= 1.0),
                beta REAL NOT NULL CHECK (beta >= 1.0),
                pulls INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, slot, value)
            );
            CREATE TABLE IF NOT EXISTS rlhf_token_weights (
                user_id TEXT NOT NULL,
                category TEXT NOT NULL,
                token TEXT NOT NULL,
                weight REAL NOT NULL CHECK (weight BETWEEN 0.0 AND 2.0),
                updates INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, category, token)
            );
            CREATE TABLE IF NOT EXISTS rlhf_feedback_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                category TEXT NOT NULL,
                token TEXT NOT NULL,
                reward REAL NOT NULL,
                weight_before REAL NOT NULL,
                weight_after REAL NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS interaction_events (
                event_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                generation_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_interaction_user
                ON interaction_events(user_id, created_at);
            CREATE TABLE IF NOT EXISTS coverage_reports (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                selected_ids_json TEXT NOT NULL,
                per_slot_json TEXT NOT NULL,
                diversity_score REAL NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS attribute_gaps (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                slot TEXT NOT NULL,
                uncovered_values_json TEXT NOT NULL,
                severity REAL NOT NULL,
                recommended_boost REAL NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_gaps_user
                ON attribute_gaps(user_id, consumed);",
        )?;
        Ok(())
    }

    /// Insert the user row if it does not exist.
    pub fn ensure_user(&self, conn: &Connection, user_id: &str) -> EngineResult<()> {
        conn.execute(
            "INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)",
            rusqlite::params![user_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Database;

    /// Fresh on-disk database in a temp dir; the dir guard keeps it
    /// alive for the test.
    pub fn temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("atelier.db")).unwrap();
        (dir, db)
    }
}
