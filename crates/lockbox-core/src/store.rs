//! Persistent store codec for Lockbox.
//!
//! The store is a single JSON document holding the key-derivation
//! parameters, the verification token, every secret's encrypted version
//! history, and the policy list. Binary fields are base64 text on disk; the
//! set of binary fields is closed: `salt`, `verification_nonce`,
//! `verification_token`, and per version `encrypted_dek`, `dek_nonce`,
//! `encrypted_value`, `value_nonce`. Nothing else is binary.
//!
//! Writes are atomic with respect to crashes: serialize to a sibling
//! temporary file, flush, then rename over the target. Readers observe
//! either the previous document or the new one, never a torn write.
//!
//! The codec does not verify record-level cryptography; a forged ciphertext
//! only surfaces when the engine attempts to open it.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::crypto::{MIN_PBKDF2_ITERATIONS, NONCE_LEN, SALT_LEN};
use crate::error::VaultError;
use crate::policy::PolicyRule;

/// The persistent top-level artifact.
///
/// `secrets` is a `BTreeMap` so serialization order is deterministic and a
/// load/save cycle reproduces the document byte for byte. `policies` keeps
/// insertion order so removals are deterministic; evaluation never depends
/// on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultRecord {
    /// PBKDF2 salt, fixed at initialization.
    #[serde(with = "b64_array")]
    pub salt: [u8; SALT_LEN],
    /// PBKDF2 iteration count, fixed at initialization.
    pub iterations: u32,
    /// Nonce for the verification token.
    #[serde(with = "b64_array")]
    pub verification_nonce: [u8; NONCE_LEN],
    /// Ciphertext of the fixed verification plaintext under the root key.
    /// Opening it is the sole correctness oracle for a candidate root key.
    #[serde(with = "b64_vec")]
    pub verification_token: Vec<u8>,
    /// Secrets keyed by path.
    pub secrets: BTreeMap<String, SecretRecord>,
    /// Policy rules, in insertion order.
    pub policies: Vec<PolicyRule>,
}

impl VaultRecord {
    /// A fresh record with no secrets and no policies.
    #[must_use]
    pub fn new(
        salt: [u8; SALT_LEN],
        iterations: u32,
        verification_nonce: [u8; NONCE_LEN],
        verification_token: Vec<u8>,
    ) -> Self {
        Self {
            salt,
            iterations,
            verification_nonce,
            verification_token,
            secrets: BTreeMap::new(),
            policies: Vec::new(),
        }
    }
}

/// One secret: a path and its non-empty version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// The secret's path (duplicated from the map key).
    pub path: String,
    /// Versions in ascending `version_number` order, numbered 1..=N.
    pub versions: Vec<VersionRecord>,
}

/// One encrypted version of a secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Position in the history, starting at 1.
    pub version_number: u32,
    /// The version's DEK, encrypted under the root key.
    #[serde(with = "b64_vec")]
    pub encrypted_dek: Vec<u8>,
    /// Nonce for `encrypted_dek`.
    #[serde(with = "b64_array")]
    pub dek_nonce: [u8; NONCE_LEN],
    /// The UTF-8 secret value, encrypted under the DEK.
    #[serde(with = "b64_vec")]
    pub encrypted_value: Vec<u8>,
    /// Nonce for `encrypted_value`.
    #[serde(with = "b64_array")]
    pub value_nonce: [u8; NONCE_LEN],
    /// Creation time, UTC.
    pub created_at: DateTime<Utc>,
}

/// Whether the store artifact exists on disk.
#[must_use]
pub fn vault_file_exists(vault_file: &Path) -> bool {
    vault_file.exists()
}

/// Load and decode the store.
///
/// # Errors
///
/// [`VaultError::VaultMissing`] when the artifact does not exist.
/// [`VaultError::StoreCorrupt`] when it cannot be parsed, a binary field
/// does not decode, a required field is absent, the iteration count is
/// below the floor, or a version history is malformed. All fatal.
pub fn load_vault(vault_file: &Path) -> Result<VaultRecord, VaultError> {
    if !vault_file.exists() {
        return Err(VaultError::VaultMissing {
            path: vault_file.display().to_string(),
        });
    }

    let text = fs::read_to_string(vault_file)?;
    let record: VaultRecord =
        serde_json::from_str(&text).map_err(|e| VaultError::StoreCorrupt {
            reason: e.to_string(),
        })?;

    // A weakened KDF or a broken version chain means the artifact was not
    // written by this codec.
    if record.iterations < MIN_PBKDF2_ITERATIONS {
        return Err(VaultError::StoreCorrupt {
            reason: format!(
                "iteration count {} is below the minimum of {MIN_PBKDF2_ITERATIONS}",
                record.iterations
            ),
        });
    }
    for (path, secret) in &record.secrets {
        if secret.versions.is_empty() {
            return Err(VaultError::StoreCorrupt {
                reason: format!("secret '{path}' has no versions"),
            });
        }
        for (i, version) in secret.versions.iter().enumerate() {
            let expected = u32::try_from(i).unwrap_or(u32::MAX).saturating_add(1);
            if version.version_number != expected {
                return Err(VaultError::StoreCorrupt {
                    reason: format!(
                        "secret '{path}' version numbering is not contiguous at position {expected}"
                    ),
                });
            }
        }
    }

    Ok(record)
}

/// Encode and persist the store atomically.
///
/// Writes to a temporary file in the store's directory, flushes, then
/// renames over the target in one file-system operation.
///
/// # Errors
///
/// [`VaultError::Io`] on any file-system failure;
/// [`VaultError::StoreCorrupt`] if serialization itself fails.
pub fn save_vault(record: &VaultRecord, vault_file: &Path) -> Result<(), VaultError> {
    let text = serde_json::to_string_pretty(record).map_err(|e| VaultError::StoreCorrupt {
        reason: e.to_string(),
    })?;

    let dir = vault_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(vault_file).map_err(|e| VaultError::Io(e.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(vault_file, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Base64 transcoding for variable-length binary fields.
mod b64_vec {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Base64 transcoding for fixed-length binary fields (salt and nonces).
mod b64_array {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(text).map_err(serde::de::Error::custom)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {N} bytes, got {len}")))
    }
}
