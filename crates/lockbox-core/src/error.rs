//! Error types for `lockbox-core`.
//!
//! Every failure the engine can surface is one variant of [`VaultError`].
//! The `Display` strings are the boundary messages: the CLI prints them
//! verbatim after an `Error: ` prefix, so their wording is load-bearing.
//! Crypto errors never include key material.

/// Errors from the cryptographic primitives.
///
/// These are internal: the engine reclassifies [`CryptoError::AuthFailure`]
/// at the call site — a failed verification-token open becomes
/// [`VaultError::BadPassword`], a failed open of a stored record becomes
/// [`VaultError::StoreCorrupt`].
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM tag verification failed (wrong key or tampered data).
    #[error("authenticated decryption failed")]
    AuthFailure,

    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },
}

/// Errors from vault engine operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// `init` refused to overwrite an existing store artifact.
    #[error("Vault file already exists at {path}")]
    VaultExists { path: String },

    /// The store artifact does not exist.
    #[error("Vault file not found at {path}")]
    VaultMissing { path: String },

    /// No active session — the root key is unavailable.
    #[error("Vault is sealed")]
    Sealed,

    /// `seal` was called with no active session.
    #[error("Vault is already sealed")]
    AlreadySealed,

    /// The supplied master password does not re-derive the root key.
    #[error("Incorrect master password")]
    BadPassword,

    /// `init` requires a non-empty master password.
    #[error("Master password must not be empty")]
    EmptyPassword,

    /// The path does not satisfy the path grammar.
    #[error("Invalid path format: '{path}'")]
    InvalidPath { path: String },

    /// Secret values must be non-empty.
    #[error("Secret value must not be empty")]
    EmptyValue,

    /// No policy grants the identity the required capability on the path.
    #[error("Access denied for identity '{identity}' on path '{path}' (requires {capability})")]
    AccessDenied {
        identity: String,
        path: String,
        capability: crate::policy::Capability,
    },

    /// No secret exists at the path.
    #[error("Secret not found at path '{path}'")]
    SecretNotFound { path: String },

    /// The secret exists but has no such version.
    #[error("Version {version} not found for path '{path}'")]
    VersionNotFound { path: String, version: u32 },

    /// The capability name is not one of the closed set.
    #[error("Invalid capability '{name}'. Valid capabilities: read, write, list, delete")]
    InvalidCapability { name: String },

    /// A policy must grant at least one capability.
    #[error("At least one capability must be specified")]
    EmptyCapabilities,

    /// The policy's identity or pattern is out of bounds.
    #[error("Invalid policy: {reason}")]
    InvalidPolicy { reason: String },

    /// No policy matches the identity and pattern exactly.
    #[error("No policy found for identity '{identity}' on path '{pattern}'")]
    PolicyNotFound { identity: String, pattern: String },

    /// The store (or session) artifact cannot be parsed or fails
    /// authentication. Fatal — no recovery is attempted.
    #[error("Vault store is corrupted: {reason}")]
    StoreCorrupt { reason: String },

    /// The audit log does not exist, so there is nothing to replay.
    #[error("Audit log file not found at {path}")]
    LogMissing { path: String },

    /// A cryptographic primitive failed outside the reclassified sites.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// An underlying file-system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
