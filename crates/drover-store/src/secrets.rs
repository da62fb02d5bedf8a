//! Secret CRUD. Values are SecretBox envelopes; plaintext never lands here.

use chrono::Utc;
use rusqlite::params;

use crate::error::{Result, StoreError};
use crate::Store;

impl Store {
    /// Create or replace a secret for a project.
    pub fn upsert_secret(&self, project: &str, key: &str, value_enc: &str) -> Result<()> {
        self.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO secrets (project, key, value_enc, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4) \
                 ON CONFLICT(project, key) DO UPDATE SET value_enc = ?3, updated_at = ?4",
                params![project, key, value_enc, now],
            )
            .map_err(|e| {
                if StoreError::is_constraint(&e) {
                    // the remaining constraint is the FK to projects
                    StoreError::NotFound {
                        entity: "project",
                        id: project.to_string(),
                    }
                } else {
                    e.into()
                }
            })?;
            Ok(())
        })
    }

    pub fn get_secret(&self, project: &str, key: &str) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value_enc FROM secrets WHERE project = ?1 AND key = ?2",
                params![project, key],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                    entity: "secret",
                    id: format!("{project}/{key}"),
                },
                other => other.into(),
            })
        })
    }

    /// Keys only, sorted. Values are never listed.
    pub fn list_secret_keys(&self, project: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT key FROM secrets WHERE project = ?1 ORDER BY key ASC")?;
            let rows = stmt.query_map([project], |row| row.get(0))?;
            let mut keys = Vec::new();
            for row in rows {
                keys.push(row?);
            }
            Ok(keys)
        })
    }

    /// All (key, envelope) pairs for env composition, sorted by key.
    pub fn list_secrets(&self, project: &str) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value_enc FROM secrets WHERE project = ?1 ORDER BY key ASC",
            )?;
            let rows = stmt.query_map([project], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let mut secrets = Vec::new();
            for row in rows {
                secrets.push(row?);
            }
            Ok(secrets)
        })
    }

    pub fn delete_secret(&self, project: &str, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM secrets WHERE project = ?1 AND key = ?2",
                params![project, key],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "secret",
                    id: format!("{project}/{key}"),
                });
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{project, store};
    use crate::StoreError;

    #[test]
    fn upsert_replaces() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        store.upsert_secret("demo", "API_KEY", "env1").unwrap();
        store.upsert_secret("demo", "API_KEY", "env2").unwrap();
        assert_eq!(store.get_secret("demo", "API_KEY").unwrap(), "env2");
        assert_eq!(store.list_secret_keys("demo").unwrap(), vec!["API_KEY"]);
    }

    #[test]
    fn keys_sorted() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        store.upsert_secret("demo", "ZULU", "z").unwrap();
        store.upsert_secret("demo", "ALPHA", "a").unwrap();
        assert_eq!(
            store.list_secret_keys("demo").unwrap(),
            vec!["ALPHA", "ZULU"]
        );
    }

    #[test]
    fn secret_for_unknown_project_not_found() {
        let store = store();
        let err = store.upsert_secret("ghost", "KEY", "v").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn delete_project_cascades_secrets() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        store.upsert_secret("demo", "API_KEY", "v").unwrap();
        store.delete_project("demo").unwrap();

        // re-create the project: its secrets are gone
        store.insert_project(&project("demo")).unwrap();
        assert!(store.list_secret_keys("demo").unwrap().is_empty());
    }

    #[test]
    fn delete_missing_secret_not_found() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        let err = store.delete_secret("demo", "NOPE").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
