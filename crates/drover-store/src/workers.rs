//! Worker CRUD. Exactly one non-terminated worker may exist per project.

use chrono::Utc;
use rusqlite::{params, Row};

use drover_spec::{Worker, WorkerStatus};

use crate::error::{Result, StoreError};
use crate::projects::parse_ts;
use crate::Store;

struct WorkerRow {
    id: String,
    project: String,
    instance_type: String,
    region: String,
    availability_zone: String,
    private_ip: Option<String>,
    public_ip: Option<String>,
    status: String,
    worker_token: String,
    created_at: String,
    last_heartbeat: Option<String>,
}

impl WorkerRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project: row.get(1)?,
            instance_type: row.get(2)?,
            region: row.get(3)?,
            availability_zone: row.get(4)?,
            private_ip: row.get(5)?,
            public_ip: row.get(6)?,
            status: row.get(7)?,
            worker_token: row.get(8)?,
            created_at: row.get(9)?,
            last_heartbeat: row.get(10)?,
        })
    }

    fn into_worker(self) -> Result<Worker> {
        let corrupt = |reason: String| StoreError::Corrupt {
            entity: "worker",
            id: self.id.clone(),
            reason,
        };

        Ok(Worker {
            status: self.status.parse::<WorkerStatus>().map_err(&corrupt)?,
            created_at: parse_ts(&self.created_at).map_err(&corrupt)?,
            last_heartbeat: match &self.last_heartbeat {
                Some(raw) => Some(parse_ts(raw).map_err(&corrupt)?),
                None => None,
            },
            id: self.id,
            project: self.project,
            instance_type: self.instance_type,
            region: self.region,
            availability_zone: self.availability_zone,
            private_ip: self.private_ip,
            public_ip: self.public_ip,
            worker_token: self.worker_token,
        })
    }
}

const WORKER_COLUMNS: &str = "id, project, instance_type, region, availability_zone, \
                              private_ip, public_ip, status, worker_token, created_at, \
                              last_heartbeat";

impl Store {
    /// Insert a worker. Fails with a conflict if the project already has a
    /// non-terminated worker.
    pub fn insert_worker(&self, worker: &Worker) -> Result<()> {
        self.with_conn(|conn| {
            let live: i64 = conn.query_row(
                "SELECT COUNT(*) FROM workers WHERE project = ?1 AND status != 'terminated'",
                [&worker.project],
                |row| row.get(0),
            )?;
            if live > 0 {
                return Err(StoreError::Conflict {
                    entity: "worker",
                    id: worker.project.clone(),
                });
            }

            conn.execute(
                "INSERT INTO workers (id, project, instance_type, region, availability_zone, \
                 private_ip, public_ip, status, worker_token, created_at, last_heartbeat) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    worker.id,
                    worker.project,
                    worker.instance_type,
                    worker.region,
                    worker.availability_zone,
                    worker.private_ip,
                    worker.public_ip,
                    worker.status.as_str(),
                    worker.worker_token,
                    worker.created_at.to_rfc3339(),
                    worker.last_heartbeat.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| {
                if StoreError::is_constraint(&e) {
                    StoreError::Conflict {
                        entity: "worker",
                        id: worker.id.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
            Ok(())
        })
    }

    pub fn get_worker(&self, id: &str) -> Result<Worker> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = ?1"),
                    [id],
                    WorkerRow::read,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "worker",
                        id: id.to_string(),
                    },
                    other => other.into(),
                })?;
            row.into_worker()
        })
    }

    /// The project's live (non-terminated) worker, if any.
    pub fn worker_for_project(&self, project: &str) -> Result<Option<Worker>> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                &format!(
                    "SELECT {WORKER_COLUMNS} FROM workers \
                     WHERE project = ?1 AND status != 'terminated' \
                     ORDER BY created_at DESC LIMIT 1"
                ),
                [project],
                WorkerRow::read,
            );
            match row {
                Ok(raw) => Ok(Some(raw.into_worker()?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn update_worker_status(&self, id: &str, status: WorkerStatus) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE workers SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "worker",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Refresh the instance addresses after launch or resize.
    pub fn update_worker_ips(
        &self,
        id: &str,
        private_ip: Option<&str>,
        public_ip: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE workers SET private_ip = ?2, public_ip = ?3 WHERE id = ?1",
                params![id, private_ip, public_ip],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "worker",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Record the instance type applied by a resize.
    pub fn update_worker_instance_type(&self, id: &str, instance_type: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE workers SET instance_type = ?2 WHERE id = ?1",
                params![id, instance_type],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "worker",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Record a heartbeat for the project's live worker.
    pub fn touch_worker_heartbeat(&self, project: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE workers SET last_heartbeat = ?2 \
                 WHERE project = ?1 AND status != 'terminated'",
                params![project, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "worker",
                    id: project.to_string(),
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
    use chrono::Utc;
    use drover_spec::{Worker, WorkerStatus};

    fn worker(id: &str, project: &str, status: WorkerStatus) -> Worker {
        Worker {
            id: id.to_string(),
            project: project.to_string(),
            instance_type: "m6i.large".to_string(),
            region: "us-east-1".to_string(),
            availability_zone: "us-east-1a".to_string(),
            private_ip: None,
            public_ip: None,
            status,
            worker_token: "ab".repeat(32),
            created_at: Utc::now(),
            last_heartbeat: None,
        }
    }

    #[test]
    fn one_live_worker_per_project() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        store
            .insert_worker(&worker("i-1", "demo", WorkerStatus::Provisioning))
            .unwrap();

        let err = store
            .insert_worker(&worker("i-2", "demo", WorkerStatus::Provisioning))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // terminated workers do not block a replacement
        store
            .update_worker_status("i-1", WorkerStatus::Terminated)
            .unwrap();
        store
            .insert_worker(&worker("i-2", "demo", WorkerStatus::Provisioning))
            .unwrap();
    }

    #[test]
    fn worker_for_project_skips_terminated() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        store
            .insert_worker(&worker("i-1", "demo", WorkerStatus::Ready))
            .unwrap();
        assert_eq!(
            store.worker_for_project("demo").unwrap().unwrap().id,
            "i-1"
        );

        store
            .update_worker_status("i-1", WorkerStatus::Terminated)
            .unwrap();
        assert!(store.worker_for_project("demo").unwrap().is_none());
    }

    #[test]
    fn heartbeat_touches_live_worker() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        store
            .insert_worker(&worker("i-1", "demo", WorkerStatus::Ready))
            .unwrap();

        store.touch_worker_heartbeat("demo").unwrap();
        let w = store.get_worker("i-1").unwrap();
        assert!(w.last_heartbeat.is_some());
    }

    #[test]
    fn heartbeat_without_worker_not_found() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        let err = store.touch_worker_heartbeat("demo").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn delete_project_cascades_workers() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        store
            .insert_worker(&worker("i-1", "demo", WorkerStatus::Ready))
            .unwrap();
        store.delete_project("demo").unwrap();
        assert!(matches!(
            store.get_worker("i-1").unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn ips_update() {
        let store = store();
        store.insert_project(&project("demo")).unwrap();
        store
            .insert_worker(&worker("i-1", "demo", WorkerStatus::Provisioning))
            .unwrap();
        store
            .update_worker_ips("i-1", Some("10.0.0.9"), Some("54.1.2.3"))
            .unwrap();
        let w = store.get_worker("i-1").unwrap();
        assert_eq!(w.private_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(w.public_ip.as_deref(), Some("54.1.2.3"));
    }
}
