//! `XChaCha20-Poly1305` encryption behind a text envelope.
//!
//! The key is derived once per process from the operator master secret via
//! Argon2id with a fixed application salt. Each value gets a fresh random
//! nonce; the authentication tag is stored detached so the envelope is a
//! plain `nonce_hex:tag_hex:ciphertext_hex` string.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Tag, XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{Result, SecretsError};

/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of the derived encryption key in bytes.
pub const KEY_SIZE: usize = 32;

/// Fixed application salt for master-secret key derivation. The master
/// secret itself is the only input that must stay private.
const KDF_SALT: &[u8] = b"drover.secretbox.v1";

/// Process-wide secret encryptor.
///
/// Key bytes are wrapped in [`Zeroizing`] so they are cleared from memory
/// on drop.
#[derive(Clone)]
pub struct SecretBox {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    /// Derive the encryption key from the operator master secret.
    ///
    /// # Errors
    /// Returns `SecretsError::MasterSecret` if the secret is empty or key
    /// derivation fails.
    pub fn from_master_secret(master_secret: &str) -> Result<Self> {
        use argon2::{Algorithm, Argon2, Params, Version};

        if master_secret.is_empty() {
            return Err(SecretsError::MasterSecret(
                "master secret must not be empty".to_string(),
            ));
        }

        // OWASP interactive minimums
        let params = Params::new(19 * 1024, 2, 1, Some(KEY_SIZE))
            .map_err(|e| SecretsError::MasterSecret(format!("invalid Argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        argon2
            .hash_password_into(master_secret.as_bytes(), KDF_SALT, key.as_mut())
            .map_err(|e| SecretsError::MasterSecret(format!("key derivation failed: {e}")))?;

        Ok(Self { key })
    }

    /// Encrypt a plaintext value into a `nonce:tag:ciphertext` hex envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = XChaCha20Poly1305::new_from_slice(self.key.as_ref())
            .map_err(|e| SecretsError::Encryption(format!("failed to create cipher: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(nonce, b"", &mut buffer)
            .map_err(|e| SecretsError::Encryption(format!("encryption failed: {e}")))?;

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(tag),
            hex::encode(&buffer)
        ))
    }

    /// Decrypt an envelope produced by [`Self::encrypt`].
    ///
    /// # Errors
    /// Returns `SecretsError::Integrity` for a malformed envelope, a bad
    /// tag, or non-UTF-8 plaintext. The error carries no ciphertext.
    pub fn decrypt(&self, envelope: &str) -> Result<String> {
        let (nonce_bytes, tag_bytes, mut buffer) = parse_envelope(envelope)?;

        let cipher = XChaCha20Poly1305::new_from_slice(self.key.as_ref())
            .map_err(|e| SecretsError::Encryption(format!("failed to create cipher: {e}")))?;

        let nonce = XNonce::from_slice(&nonce_bytes);
        let tag = Tag::from_slice(&tag_bytes);

        cipher
            .decrypt_in_place_detached(nonce, b"", &mut buffer, tag)
            .map_err(|_| SecretsError::Integrity)?;

        String::from_utf8(buffer).map_err(|_| SecretsError::Integrity)
    }
}

/// Split and hex-decode an envelope into (nonce, tag, ciphertext)
fn parse_envelope(envelope: &str) -> Result<([u8; NONCE_SIZE], [u8; TAG_SIZE], Vec<u8>)> {
    let mut parts = envelope.splitn(3, ':');
    let (nonce_hex, tag_hex, ct_hex) = match (parts.next(), parts.next(), parts.next()) {
        (Some(n), Some(t), Some(c)) => (n, t, c),
        _ => return Err(SecretsError::Integrity),
    };

    let nonce_vec = hex::decode(nonce_hex).map_err(|_| SecretsError::Integrity)?;
    let tag_vec = hex::decode(tag_hex).map_err(|_| SecretsError::Integrity)?;
    let ciphertext = hex::decode(ct_hex).map_err(|_| SecretsError::Integrity)?;

    let nonce: [u8; NONCE_SIZE] = nonce_vec.try_into().map_err(|_| SecretsError::Integrity)?;
    let tag: [u8; TAG_SIZE] = tag_vec.try_into().map_err(|_| SecretsError::Integrity)?;

    Ok((nonce, tag, ciphertext))
}
