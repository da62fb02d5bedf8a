use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("{entity} {id:?} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id:?} already exists")]
    Conflict { entity: &'static str, id: String },

    /// A stored value no longer parses (status string, timestamp, JSON list)
    #[error("corrupt row for {entity} {id:?}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Whether the underlying SQLite error is a uniqueness/constraint clash
    pub(crate) fn is_constraint(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
