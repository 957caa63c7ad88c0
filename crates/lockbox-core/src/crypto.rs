//! Cryptographic primitives for Lockbox.
//!
//! Provides PBKDF2-HMAC-SHA256 root-key derivation, AES-256-GCM
//! authenticated encryption with caller-visible nonces, and zeroize-on-drop
//! key newtypes. Key bytes are cleared from memory when dropped and never
//! appear in `Debug` output.
//!
//! # Security model
//!
//! - Every encryption generates a fresh 96-bit nonce via `OsRng`.
//! - Ciphertext carries the 16-byte GCM tag as its tail; associated data is
//!   always empty.
//! - The nonce is returned beside the ciphertext rather than prepended,
//!   because the store format persists nonces in dedicated fields.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// PBKDF2 salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Minimum PBKDF2 iteration count. Stores below this floor are rejected.
pub const MIN_PBKDF2_ITERATIONS: u32 = 600_000;

/// The password-derived root key. Zeroized on drop.
///
/// Encrypts only data-encryption keys and the verification token, never
/// secret values directly.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RootKey([u8; KEY_LEN]);

impl RootKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// The caller must not log or persist these outside the session carrier.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// A per-version data encryption key. Zeroized on drop.
///
/// Generated fresh for every stored version and used for exactly one
/// encryption under itself.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Dek([u8; KEY_LEN]);

impl Dek {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for Dek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dek").field("bytes", &"[REDACTED]").finish()
    }
}

/// Derive the 256-bit root key from a master password.
///
/// PBKDF2-HMAC-SHA256 over the UTF-8 password bytes. Deterministic for a
/// given `(password, salt, iterations)` triple. The iteration floor is
/// enforced by the engine, not here.
#[must_use]
pub fn derive_root_key(password: &str, salt: &[u8; SALT_LEN], iterations: u32) -> RootKey {
    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    let key = RootKey::from_bytes(out);
    out.zeroize();
    key
}

/// Encrypt plaintext under AES-256-GCM with a fresh random nonce.
///
/// Returns `(nonce, ciphertext)`; the ciphertext ends with the 16-byte
/// authentication tag.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;
    Ok((nonce, ciphertext))
}

/// Decrypt ciphertext produced by [`seal`].
///
/// # Errors
///
/// Returns [`CryptoError::AuthFailure`] when the tag does not verify —
/// wrong key, wrong nonce, or tampered data. Nothing else is recoverable at
/// this layer.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthFailure)
}

/// Generate a random 16-byte PBKDF2 salt from the OS CSPRNG.
#[must_use]
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a fresh random data encryption key from the OS CSPRNG.
#[must_use]
pub fn random_dek() -> Dek {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    let dek = Dek::from_bytes(bytes);
    bytes.zeroize();
    dek
}
