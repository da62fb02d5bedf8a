//! Operator token storage. Only SHA-256 hashes land here.

use chrono::Utc;
use rusqlite::params;

use crate::error::Result;
use crate::Store;

impl Store {
    /// Insert a token hash. Replaces nothing; duplicate hashes are ignored.
    pub fn insert_token(&self, token_hash: &str, label: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO tokens (token_hash, label, created_at) \
                 VALUES (?1, ?2, ?3)",
                params![token_hash, label, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Whether a presented token hash is known.
    pub fn token_exists(&self, token_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tokens WHERE token_hash = ?1",
                [token_hash],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Whether any operator token has been seeded yet.
    pub fn has_tokens(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM tokens", [], |row| row.get(0))?;
            Ok(count > 0)
        })
    }
}
