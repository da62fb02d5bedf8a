use thiserror::Error;

/// Validation failures for operator-supplied input
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Project name does not match the allowed shape
    #[error("invalid project name {name:?}: {reason}")]
    ProjectName { name: String, reason: String },

    /// Secret key does not match the allowed shape
    #[error("invalid secret key {key:?}: {reason}")]
    SecretKey { key: String, reason: String },

    /// Unknown enum value in a request body
    #[error("invalid value {value:?} for {field}")]
    InvalidValue { field: &'static str, value: String },
}
