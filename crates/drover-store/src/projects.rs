//! Project CRUD

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use drover_spec::{Project, ProjectStatus};

use crate::error::{Result, StoreError};
use crate::Store;

/// Raw column values before status/list/timestamp parsing
struct ProjectRow {
    name: String,
    status: String,
    llm_credential_enc: Option<String>,
    extra_env_enc: Option<String>,
    mcp_servers: String,
    instance_type: Option<String>,
    worker_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            status: row.get(1)?,
            llm_credential_enc: row.get(2)?,
            extra_env_enc: row.get(3)?,
            mcp_servers: row.get(4)?,
            instance_type: row.get(5)?,
            worker_id: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_project(self) -> Result<Project> {
        let corrupt = |reason: String| StoreError::Corrupt {
            entity: "project",
            id: self.name.clone(),
            reason,
        };

        Ok(Project {
            status: self.status.parse::<ProjectStatus>().map_err(&corrupt)?,
            mcp_servers: serde_json::from_str(&self.mcp_servers)
                .map_err(|e| corrupt(e.to_string()))?,
            created_at: parse_ts(&self.created_at).map_err(&corrupt)?,
            updated_at: parse_ts(&self.updated_at).map_err(&corrupt)?,
            name: self.name,
            llm_credential_enc: self.llm_credential_enc,
            extra_env_enc: self.extra_env_enc,
            instance_type: self.instance_type,
            worker_id: self.worker_id,
        })
    }
}

pub(crate) fn parse_ts(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {raw:?}: {e}"))
}

const PROJECT_COLUMNS: &str = "name, status, llm_credential_enc, extra_env_enc, mcp_servers, \
                               instance_type, worker_id, created_at, updated_at";

impl Store {
    /// Insert a new project. Duplicate names conflict.
    pub fn insert_project(&self, project: &Project) -> Result<()> {
        self.with_conn(|conn| {
            let mcp = serde_json::to_string(&project.mcp_servers).unwrap_or_else(|_| "[]".into());
            conn.execute(
                "INSERT INTO projects (name, status, llm_credential_enc, extra_env_enc, \
                 mcp_servers, instance_type, worker_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    project.name,
                    project.status.as_str(),
                    project.llm_credential_enc,
                    project.extra_env_enc,
                    mcp,
                    project.instance_type,
                    project.worker_id,
                    project.created_at.to_rfc3339(),
                    project.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| {
                if StoreError::is_constraint(&e) {
                    StoreError::Conflict {
                        entity: "project",
                        id: project.name.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
            Ok(())
        })
    }

    pub fn get_project(&self, name: &str) -> Result<Project> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE name = ?1"),
                    [name],
                    ProjectRow::read,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "project",
                        id: name.to_string(),
                    },
                    other => other.into(),
                })?;
            row.into_project()
        })
    }

    /// All projects, ordered by name.
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY name ASC"
            ))?;
            let rows = stmt.query_map([], ProjectRow::read)?;
            let mut projects = Vec::new();
            for row in rows {
                projects.push(row?.into_project()?);
            }
            Ok(projects)
        })
    }

    pub fn update_project_status(&self, name: &str, status: ProjectStatus) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE projects SET status = ?2, updated_at = ?3 WHERE name = ?1",
                params![name, status.as_str(), Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "project",
                    id: name.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Bind or unbind the project's live worker id.
    pub fn set_project_worker(&self, name: &str, worker_id: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE projects SET worker_id = ?2, updated_at = ?3 WHERE name = ?1",
                params![name, worker_id, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "project",
                    id: name.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Replace the encrypted credential / extra-env fields.
    pub fn update_project_credentials(
        &self,
        name: &str,
        llm_credential_enc: Option<&str>,
        extra_env_enc: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE projects SET llm_credential_enc = ?2, extra_env_enc = ?3, \
                 updated_at = ?4 WHERE name = ?1",
                params![
                    name,
                    llm_credential_enc,
                    extra_env_enc,
                    Utc::now().to_rfc3339()
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "project",
                    id: name.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Delete a project; secrets and workers cascade.
    pub fn delete_project(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM projects WHERE name = ?1", [name])?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "project",
                    id: name.to_string(),
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
    use drover_spec::ProjectStatus;

    #[test]
    fn insert_get_list() {
        let store = store();
        store.insert_project(&project("beta")).unwrap();
        store.insert_project(&project("alpha")).unwrap();

        let got = store.get_project("alpha").unwrap();
        assert_eq!(got.name, "alpha");
        assert_eq!(got.status, ProjectStatus::Creating);

        let all = store.list_projects().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alpha"); // ordered by name
    }

    #[test]
    fn duplicate_name_conflicts() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        let err = store.insert_project(&project("demo")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn status_update_roundtrip() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        store
            .update_project_status("demo", ProjectStatus::Running)
            .unwrap();
        assert_eq!(
            store.get_project("demo").unwrap().status,
            ProjectStatus::Running
        );
    }

    #[test]
    fn second_delete_reports_not_found() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        store.delete_project("demo").unwrap();
        let err = store.delete_project("demo").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn missing_project_not_found() {
        let store = store();
        assert!(matches!(
            store.get_project("ghost").unwrap_err(),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            store
                .update_project_status("ghost", ProjectStatus::Error)
                .unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn mcp_servers_persist() {
        let store = store();
        let mut p = project("demo");
        p.mcp_servers = vec!["filesystem".into(), "browser".into()];
        store.insert_project(&p).unwrap();
        assert_eq!(
            store.get_project("demo").unwrap().mcp_servers,
            vec!["filesystem".to_string(), "browser".to_string()]
        );
    }
}
