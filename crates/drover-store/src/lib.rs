//! Durable store for the drover control plane
//!
//! A single SQLite file holds `projects`, `secrets`, `workers`, and
//! `tokens`. WAL journaling is enabled and foreign keys cascade
//! Project -> Secret and Project -> Worker. All access goes through typed
//! CRUD methods on [`Store`] under one internal write lock; migrations are
//! additive and idempotent.

mod error;
mod projects;
mod schema;
mod secrets;
mod tokens;
mod workers;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

pub use error::{Result, StoreError};

/// The control plane's only shared mutable resource.
///
/// Cloning is cheap via `std::sync::Arc` at the call site; the connection
/// itself is exclusive behind the mutex (SQLite's single-writer
/// discipline).
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| StoreError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::initialize(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: ":memory:".to_string(),
            reason: e.to_string(),
        })?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::Open {
                path: "pragma journal_mode".to_string(),
                reason: e.to_string(),
            })?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| StoreError::Open {
                path: "pragma foreign_keys".to_string(),
                reason: e.to_string(),
            })?;

        let applied = schema::migrate(&conn)?;
        info!(migrations = applied, "store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a closure with the locked connection. Internal helper for the
    /// per-entity modules.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Store;
    use chrono::Utc;
    use drover_spec::{Project, ProjectStatus};

    pub fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    pub fn project(name: &str) -> Project {
        let now = Utc::now();
        Project {
            name: name.to_string(),
            status: ProjectStatus::Creating,
            llm_credential_enc: None,
            extra_env_enc: None,
            mcp_servers: vec![],
            instance_type: None,
            worker_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
