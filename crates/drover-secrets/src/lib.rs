//! Secret encryption for drover
//!
//! Fails-closed authenticated encryption of operator-provided values with
//! a process-wide master secret. Values are stored as a single text
//! envelope (`nonce_hex:tag_hex:ciphertext_hex`); any authentication
//! failure surfaces as [`SecretsError::Integrity`] and the ciphertext is
//! never exposed to the operator.

mod error;
mod secretbox;

pub use error::{Result, SecretsError};
pub use secretbox::{SecretBox, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
