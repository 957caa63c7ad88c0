//! The Lockbox engine.
//!
//! Coordinates the whole of an operation: load the store, fetch the root
//! key from the session carrier, run the policy gate, do the cryptographic
//! work, persist, audit. The ordering contract is strict — for mutating
//! operations the store is persisted before the success audit entry, and
//! the audit entry is appended before the operation returns, so a crash
//! leaves the log no more optimistic than the store.
//!
//! The root key is never a long-lived field: each operation re-reads it
//! from the session carrier, uses it on its own stack frame, and drops
//! (zeroizes) it on return.
//!
//! Sealed-state rejections (`VaultSealed` and friends) are preconditions,
//! not security events: they abort before any store or policy access and
//! write no audit entry.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::audit::{AuditLog, AuditOperation, AuditOutcome};
use crate::crypto::{self, RootKey, KEY_LEN, MIN_PBKDF2_ITERATIONS};
use crate::error::{CryptoError, VaultError};
use crate::policy::{self, Capability, PolicyRule};
use crate::session::SessionFile;
use crate::store::{self, SecretRecord, VaultRecord, VersionRecord};

/// The fixed plaintext sealed under the root key at initialization.
/// Successfully opening it is the sole correctness oracle for a candidate
/// root key.
const VERIFICATION_PLAINTEXT: &[u8] = b"vault-verification-token";

/// Identity recorded for lifecycle and policy-management audit entries.
const SYSTEM_IDENTITY: &str = "system";

/// Lifecycle state of the vault, as reported by [`Vault::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultStatus {
    /// Whether the store artifact exists.
    pub exists: bool,
    /// Whether a session (and therefore the root key) is available.
    pub unsealed: bool,
}

/// Result of a successful [`Vault::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSecret {
    /// The secret's path.
    pub path: String,
    /// The version number this write produced.
    pub version: u32,
    /// True when the path did not exist before (a `store`, version 1);
    /// false for an `update` appending version max+1.
    pub created: bool,
}

/// A decrypted secret returned by [`Vault::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    /// The secret's path.
    pub path: String,
    /// The version that was opened.
    pub version: u32,
    /// The plaintext value.
    pub value: String,
}

/// The engine. Holds only the two artifact paths; all state lives on disk.
#[derive(Debug, Clone)]
pub struct Vault {
    vault_file: PathBuf,
    audit_file: PathBuf,
}

impl Vault {
    /// An engine over the given store and audit log paths.
    #[must_use]
    pub fn new(vault_file: impl Into<PathBuf>, audit_file: impl Into<PathBuf>) -> Self {
        Self {
            vault_file: vault_file.into(),
            audit_file: audit_file.into(),
        }
    }

    /// The store artifact path.
    #[must_use]
    pub fn vault_file(&self) -> &Path {
        &self.vault_file
    }

    fn session(&self) -> SessionFile {
        SessionFile::beside(&self.vault_file)
    }

    fn audit(&self) -> AuditLog {
        AuditLog::new(&self.audit_file)
    }

    /// Fetch the root key from the session carrier.
    fn ensure_unsealed(&self) -> Result<RootKey, VaultError> {
        self.session().get()?.ok_or(VaultError::Sealed)
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Create a new, empty, sealed vault protected by `password`.
    ///
    /// Generates the salt, derives the root key, seals the verification
    /// token under it, and writes the empty store. The vault is left
    /// sealed: `unseal` must follow before any secret operation.
    ///
    /// # Errors
    ///
    /// - [`VaultError::EmptyPassword`] for an empty master password.
    /// - [`VaultError::VaultExists`] if the store artifact already exists.
    pub fn init(&self, password: &str) -> Result<(), VaultError> {
        if password.is_empty() {
            return Err(VaultError::EmptyPassword);
        }
        if store::vault_file_exists(&self.vault_file) {
            return Err(VaultError::VaultExists {
                path: self.vault_file.display().to_string(),
            });
        }

        let salt = crypto::random_salt();
        let iterations = MIN_PBKDF2_ITERATIONS;
        let root_key = crypto::derive_root_key(password, &salt, iterations);
        let (verification_nonce, verification_token) =
            crypto::seal(root_key.as_bytes(), VERIFICATION_PLAINTEXT)?;

        let record = VaultRecord::new(salt, iterations, verification_nonce, verification_token);
        store::save_vault(&record, &self.vault_file)?;

        // A stale session from a previous artifact at this path must not
        // authorize operations against the new one.
        self.session().clear()?;

        self.audit().append(
            SYSTEM_IDENTITY,
            AuditOperation::Init,
            None,
            AuditOutcome::Success,
            None,
        )?;
        info!(vault = %self.vault_file.display(), "vault initialized");
        Ok(())
    }

    /// Unseal the vault with the master password.
    ///
    /// Re-derives the root key from the stored salt and iteration count and
    /// proves it against the verification token before publishing it to the
    /// session carrier.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultMissing`] if the store artifact does not exist.
    /// - [`VaultError::BadPassword`] when the token does not open; the
    ///   attempt is audited as an error and the vault stays sealed.
    pub fn unseal(&self, password: &str) -> Result<(), VaultError> {
        let record = store::load_vault(&self.vault_file)?;
        let root_key = crypto::derive_root_key(password, &record.salt, record.iterations);

        match crypto::open(
            root_key.as_bytes(),
            &record.verification_nonce,
            &record.verification_token,
        ) {
            Ok(mut token) => token.zeroize(),
            Err(CryptoError::AuthFailure) => {
                self.audit().append(
                    SYSTEM_IDENTITY,
                    AuditOperation::Unseal,
                    None,
                    AuditOutcome::Error,
                    Some("Incorrect master password"),
                )?;
                warn!(vault = %self.vault_file.display(), "unseal rejected: bad password");
                return Err(VaultError::BadPassword);
            }
            Err(e) => return Err(e.into()),
        }

        self.session().put(&root_key)?;
        self.audit().append(
            SYSTEM_IDENTITY,
            AuditOperation::Unseal,
            None,
            AuditOutcome::Success,
            None,
        )?;
        info!(vault = %self.vault_file.display(), "vault unsealed");
        Ok(())
    }

    /// Seal the vault, discarding the root key.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::AlreadySealed`] when no session is active —
    /// sealing twice is a precondition error, not a no-op.
    pub fn seal(&self) -> Result<(), VaultError> {
        let session = self.session();
        if session.get()?.is_none() {
            return Err(VaultError::AlreadySealed);
        }

        session.clear()?;
        self.audit().append(
            SYSTEM_IDENTITY,
            AuditOperation::Seal,
            None,
            AuditOutcome::Success,
            None,
        )?;
        info!(vault = %self.vault_file.display(), "vault sealed");
        Ok(())
    }

    /// Report whether the store artifact exists and whether a session is
    /// active. Never audits.
    #[must_use]
    pub fn status(&self) -> VaultStatus {
        VaultStatus {
            exists: store::vault_file_exists(&self.vault_file),
            unsealed: self.session().exists(),
        }
    }

    // ── secrets ──────────────────────────────────────────────────────

    /// Store a new secret or append a new version to an existing one.
    ///
    /// Envelope encryption: a fresh DEK encrypts the value, the root key
    /// encrypts the DEK. A new path gets version 1 and is audited as
    /// `store`; an existing path gets version max+1 and is audited as
    /// `update`. The policy gate requires `write` either way.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Sealed`] with no active session.
    /// - [`VaultError::InvalidPath`] / [`VaultError::EmptyValue`] before
    ///   any other work.
    /// - [`VaultError::AccessDenied`] (audited as `denied`).
    pub fn put(&self, path: &str, value: &str, identity: &str) -> Result<StoredSecret, VaultError> {
        let root_key = self.ensure_unsealed()?;

        if !policy::validate_path(path) {
            return Err(VaultError::InvalidPath {
                path: path.to_owned(),
            });
        }
        if value.is_empty() {
            return Err(VaultError::EmptyValue);
        }

        let mut record = store::load_vault(&self.vault_file)?;
        if !policy::check_access(&record.policies, identity, path, Capability::Write) {
            return self.deny(identity, AuditOperation::Store, path, Capability::Write);
        }

        let dek = crypto::random_dek();
        let (value_nonce, encrypted_value) = crypto::seal(dek.as_bytes(), value.as_bytes())?;
        let (dek_nonce, encrypted_dek) = crypto::seal(root_key.as_bytes(), dek.as_bytes())?;

        let mut version = VersionRecord {
            version_number: 1,
            encrypted_dek,
            dek_nonce,
            encrypted_value,
            value_nonce,
            created_at: Utc::now(),
        };

        let (version_number, created, operation) = match record.secrets.get_mut(path) {
            Some(secret) => {
                let next = u32::try_from(secret.versions.len())
                    .unwrap_or(u32::MAX)
                    .saturating_add(1);
                version.version_number = next;
                secret.versions.push(version);
                (next, false, AuditOperation::Update)
            }
            None => {
                record.secrets.insert(
                    path.to_owned(),
                    SecretRecord {
                        path: path.to_owned(),
                        versions: vec![version],
                    },
                );
                (1, true, AuditOperation::Store)
            }
        };

        store::save_vault(&record, &self.vault_file)?;
        self.audit()
            .append(identity, operation, Some(path), AuditOutcome::Success, None)?;
        Ok(StoredSecret {
            path: path.to_owned(),
            version: version_number,
            created,
        })
    }

    /// Retrieve a secret, optionally a specific version.
    ///
    /// Opens the DEK under the root key, then the value under the DEK.
    /// Without a version argument, the highest-numbered version is
    /// returned. The policy gate requires `read`.
    ///
    /// # Errors
    ///
    /// - [`VaultError::AccessDenied`] (audited as `denied`).
    /// - [`VaultError::SecretNotFound`] / [`VaultError::VersionNotFound`]
    ///   (audited as `error`).
    /// - [`VaultError::StoreCorrupt`] when a stored ciphertext fails
    ///   authentication.
    pub fn get(
        &self,
        path: &str,
        identity: &str,
        version: Option<u32>,
    ) -> Result<Secret, VaultError> {
        let root_key = self.ensure_unsealed()?;
        let record = store::load_vault(&self.vault_file)?;

        if !policy::check_access(&record.policies, identity, path, Capability::Read) {
            return self.deny(identity, AuditOperation::Retrieve, path, Capability::Read);
        }

        let Some(secret) = record.secrets.get(path) else {
            return self.not_found(identity, AuditOperation::Retrieve, path);
        };

        let selected = match version {
            None => secret.versions.last().ok_or_else(|| VaultError::StoreCorrupt {
                reason: format!("secret '{path}' has no versions"),
            })?,
            Some(requested) => {
                match secret
                    .versions
                    .iter()
                    .find(|v| v.version_number == requested)
                {
                    Some(v) => v,
                    None => {
                        let err = VaultError::VersionNotFound {
                            path: path.to_owned(),
                            version: requested,
                        };
                        self.audit().append(
                            identity,
                            AuditOperation::Retrieve,
                            Some(path),
                            AuditOutcome::Error,
                            Some(&err.to_string()),
                        )?;
                        return Err(err);
                    }
                }
            }
        };

        let dek = self.open_dek(&root_key, selected)?;
        let plaintext = crypto::open(dek.as_bytes(), &selected.value_nonce, &selected.encrypted_value)
            .map_err(|_| VaultError::StoreCorrupt {
                reason: format!("value for '{path}' failed authentication"),
            })?;
        let value = String::from_utf8(plaintext).map_err(|_| VaultError::StoreCorrupt {
            reason: format!("value for '{path}' is not valid UTF-8"),
        })?;

        self.audit().append(
            identity,
            AuditOperation::Retrieve,
            Some(path),
            AuditOutcome::Success,
            None,
        )?;
        Ok(Secret {
            path: path.to_owned(),
            version: selected.version_number,
            value,
        })
    }

    /// Delete a secret and its entire version history.
    ///
    /// The policy gate requires `delete`. Removal and persistence are one
    /// atomic store replacement.
    ///
    /// # Errors
    ///
    /// - [`VaultError::AccessDenied`] (audited as `denied`).
    /// - [`VaultError::SecretNotFound`] (audited as `error`).
    pub fn delete(&self, path: &str, identity: &str) -> Result<(), VaultError> {
        self.ensure_unsealed()?;
        let mut record = store::load_vault(&self.vault_file)?;

        if !policy::check_access(&record.policies, identity, path, Capability::Delete) {
            return self.deny(identity, AuditOperation::Delete, path, Capability::Delete);
        }

        if record.secrets.remove(path).is_none() {
            return self.not_found(identity, AuditOperation::Delete, path);
        }

        store::save_vault(&record, &self.vault_file)?;
        self.audit().append(
            identity,
            AuditOperation::Delete,
            Some(path),
            AuditOutcome::Success,
            None,
        )?;
        Ok(())
    }

    /// List secret paths starting with `prefix`, lexicographically sorted.
    ///
    /// The policy gate requires `list` on the prefix itself, not on each
    /// matched secret. The empty prefix (list everything) is matched only
    /// by the bare `**` pattern.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::AccessDenied`] (audited as `denied`).
    pub fn list(&self, identity: &str, prefix: &str) -> Result<Vec<String>, VaultError> {
        self.ensure_unsealed()?;
        let record = store::load_vault(&self.vault_file)?;

        if !policy::check_access(&record.policies, identity, prefix, Capability::List) {
            return self.deny(identity, AuditOperation::List, prefix, Capability::List);
        }

        // BTreeMap iteration is already lexicographic.
        let matching: Vec<String> = record
            .secrets
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();

        self.audit().append(
            identity,
            AuditOperation::List,
            Some(prefix),
            AuditOutcome::Success,
            None,
        )?;
        Ok(matching)
    }

    // ── policy management ────────────────────────────────────────────

    /// Add an access policy. The active session is the authority; there is
    /// no policy gate on policy management.
    ///
    /// # Errors
    ///
    /// - [`VaultError::EmptyCapabilities`] for an empty capability set.
    /// - [`VaultError::InvalidPolicy`] for an empty identity, an identity
    ///   over 255 characters, or an empty pattern. Patterns are otherwise
    ///   unvalidated: they accept wildcards that paths reject.
    pub fn add_policy(
        &self,
        identity: &str,
        path_pattern: &str,
        capabilities: &[Capability],
    ) -> Result<(), VaultError> {
        self.ensure_unsealed()?;

        if capabilities.is_empty() {
            return Err(VaultError::EmptyCapabilities);
        }
        if identity.is_empty() {
            return Err(VaultError::InvalidPolicy {
                reason: "identity must not be empty".to_owned(),
            });
        }
        if identity.chars().count() > 255 {
            return Err(VaultError::InvalidPolicy {
                reason: "identity must be at most 255 characters".to_owned(),
            });
        }
        if path_pattern.is_empty() {
            return Err(VaultError::InvalidPolicy {
                reason: "path pattern must not be empty".to_owned(),
            });
        }

        let mut record = store::load_vault(&self.vault_file)?;
        record.policies.push(PolicyRule {
            identity: identity.to_owned(),
            path_pattern: path_pattern.to_owned(),
            capabilities: capabilities.to_vec(),
        });
        store::save_vault(&record, &self.vault_file)?;

        self.audit().append(
            SYSTEM_IDENTITY,
            AuditOperation::AddPolicy,
            None,
            AuditOutcome::Success,
            Some(&format!("identity='{identity}', path='{path_pattern}'")),
        )?;
        info!(identity, pattern = path_pattern, "policy added");
        Ok(())
    }

    /// Remove the policy matching `identity` and `path_pattern` exactly.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::PolicyNotFound`] when no rule matches both.
    /// The miss is a pure precondition check and is not audited.
    pub fn remove_policy(&self, identity: &str, path_pattern: &str) -> Result<(), VaultError> {
        self.ensure_unsealed()?;
        let mut record = store::load_vault(&self.vault_file)?;

        let position = record
            .policies
            .iter()
            .position(|rule| rule.identity == identity && rule.path_pattern == path_pattern)
            .ok_or_else(|| VaultError::PolicyNotFound {
                identity: identity.to_owned(),
                pattern: path_pattern.to_owned(),
            })?;
        record.policies.remove(position);
        store::save_vault(&record, &self.vault_file)?;

        self.audit().append(
            SYSTEM_IDENTITY,
            AuditOperation::RemovePolicy,
            None,
            AuditOutcome::Success,
            Some(&format!("identity='{identity}', path='{path_pattern}'")),
        )?;
        info!(identity, pattern = path_pattern, "policy removed");
        Ok(())
    }

    // ── audit ────────────────────────────────────────────────────────

    /// Replay audit log entries, optionally only the trailing N.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::LogMissing`] when the log does not exist.
    pub fn audit_log(&self, last_n: Option<usize>) -> Result<Vec<String>, VaultError> {
        self.audit().replay(last_n)
    }

    // ── internal helpers ─────────────────────────────────────────────

    /// Audit a policy-gate rejection and surface `AccessDenied`.
    fn deny<T>(
        &self,
        identity: &str,
        operation: AuditOperation,
        path: &str,
        capability: Capability,
    ) -> Result<T, VaultError> {
        self.audit().append(
            identity,
            operation,
            Some(path),
            AuditOutcome::Denied,
            Some(&format!("requires {capability}")),
        )?;
        warn!(identity, path, %capability, "access denied");
        Err(VaultError::AccessDenied {
            identity: identity.to_owned(),
            path: path.to_owned(),
            capability,
        })
    }

    /// Audit an unknown-path miss as an error and surface `SecretNotFound`.
    fn not_found<T>(
        &self,
        identity: &str,
        operation: AuditOperation,
        path: &str,
    ) -> Result<T, VaultError> {
        let err = VaultError::SecretNotFound {
            path: path.to_owned(),
        };
        self.audit().append(
            identity,
            operation,
            Some(path),
            AuditOutcome::Error,
            Some(&err.to_string()),
        )?;
        Err(err)
    }

    /// Open a version's DEK under the root key.
    fn open_dek(&self, root_key: &RootKey, version: &VersionRecord) -> Result<crypto::Dek, VaultError> {
        let mut bytes = crypto::open(
            root_key.as_bytes(),
            &version.dek_nonce,
            &version.encrypted_dek,
        )
        .map_err(|_| VaultError::StoreCorrupt {
            reason: "data encryption key failed authentication".to_owned(),
        })?;

        if bytes.len() != KEY_LEN {
            bytes.zeroize();
            return Err(VaultError::StoreCorrupt {
                reason: "data encryption key has the wrong length".to_owned(),
            });
        }

        let mut raw = [0u8; KEY_LEN];
        raw.copy_from_slice(&bytes);
        bytes.zeroize();
        let dek = crypto::Dek::from_bytes(raw);
        raw.zeroize();
        Ok(dek)
    }
}
