use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretsError {
    /// Authentication failed or the envelope is malformed. Fatal for the
    /// value; callers must not expose the ciphertext.
    #[error("secret integrity check failed")]
    Integrity,

    #[error("encryption error: {0}")]
    Encryption(String),

    /// The master secret is unusable (missing or key derivation failed)
    #[error("master secret error: {0}")]
    MasterSecret(String),
}

pub type Result<T> = std::result::Result<T, SecretsError>;
