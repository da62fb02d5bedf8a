//! Additive, idempotent schema migrations
//!
//! Each step is a batch that may be re-run safely; applied versions are
//! recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::Result;

const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS projects (
            name TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            llm_credential_enc TEXT,
            extra_env_enc TEXT,
            mcp_servers TEXT NOT NULL DEFAULT '[]',
            instance_type TEXT,
            worker_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS secrets (
            project TEXT NOT NULL REFERENCES projects(name) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value_enc TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (project, key)
        );

        CREATE TABLE IF NOT EXISTS tokens (
            token_hash TEXT PRIMARY KEY,
            label TEXT,
            created_at TEXT NOT NULL
        );",
    ),
    (
        2,
        "CREATE TABLE IF NOT EXISTS workers (
            id TEXT PRIMARY KEY,
            project TEXT NOT NULL REFERENCES projects(name) ON DELETE CASCADE,
            instance_type TEXT NOT NULL,
            region TEXT NOT NULL,
            availability_zone TEXT NOT NULL,
            private_ip TEXT,
            public_ip TEXT,
            status TEXT NOT NULL,
            worker_token TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_heartbeat TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_workers_project ON workers(project);
        CREATE INDEX IF NOT EXISTS idx_workers_status ON workers(status);",
    ),
];

/// Apply pending migrations; returns how many steps ran.
pub(crate) fn migrate(conn: &Connection) -> Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let mut applied = 0;
    for (version, batch) in MIGRATIONS {
        let done: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)?;
        if done {
            continue;
        }

        conn.execute_batch(batch)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
        )?;
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(migrate(&conn).unwrap(), MIGRATIONS.len());
        assert_eq!(migrate(&conn).unwrap(), 0);
    }
}
