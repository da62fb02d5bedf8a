//! Validation of operator-supplied identifiers
//!
//! These rules gate everything that reaches the store or a shell, so they
//! are deliberately strict: a project name must match
//! `^[a-z0-9]([a-z0-9-]*[a-z0-9])?$` (1-64 chars) and a secret key must
//! match `^[A-Z_][A-Z0-9_]*$` (at most 128 chars).

use crate::error::ValidationError;
use crate::types::SecretKey;
use crate::wire::SupervisorAction;

/// Maximum project name length
pub const MAX_PROJECT_NAME_LEN: usize = 64;

/// Maximum secret key length
pub const MAX_SECRET_KEY_LEN: usize = 128;

/// Validate a project name
pub fn validate_project_name(name: &str) -> Result<(), ValidationError> {
    let fail = |reason: &str| ValidationError::ProjectName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(fail("name cannot be empty"));
    }
    if name.len() > MAX_PROJECT_NAME_LEN {
        return Err(fail("name must be at most 64 characters"));
    }

    let first = name.chars().next().unwrap_or('-');
    let last = name.chars().last().unwrap_or('-');
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(fail("name must start with a lowercase letter or digit"));
    }
    if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
        return Err(fail("name must end with a lowercase letter or digit"));
    }
    for c in name.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(fail(
                "name may only contain lowercase letters, digits, and dashes",
            ));
        }
    }
    Ok(())
}

/// Validate a secret key and wrap it
pub fn validate_secret_key(key: &str) -> Result<SecretKey, ValidationError> {
    let fail = |reason: &str| ValidationError::SecretKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(fail("key cannot be empty"));
    }
    if key.len() > MAX_SECRET_KEY_LEN {
        return Err(fail("key must be at most 128 characters"));
    }

    let first = key.chars().next().unwrap_or('0');
    if !first.is_ascii_uppercase() && first != '_' {
        return Err(fail("key must start with an uppercase letter or underscore"));
    }
    for c in key.chars() {
        if !c.is_ascii_uppercase() && !c.is_ascii_digit() && c != '_' {
            return Err(fail(
                "key may only contain uppercase letters, digits, and underscores",
            ));
        }
    }
    Ok(SecretKey(key.to_string()))
}

/// Parse a supervisor action string from a request body
pub fn parse_supervisor_action(value: &str) -> Result<SupervisorAction, ValidationError> {
    match value {
        "pause" => Ok(SupervisorAction::Pause),
        "resume" => Ok(SupervisorAction::Resume),
        "stop" => Ok(SupervisorAction::Stop),
        "restart" => Ok(SupervisorAction::Restart),
        other => Err(ValidationError::InvalidValue {
            field: "action",
            value: other.to_string(),
        }),
    }
}
