//! Append-only audit log for Lockbox.
//!
//! Every access attempt — successful, denied, or failed — becomes exactly
//! one line in a plain-text log. Each entry is pipe-separated:
//!
//! ```text
//! timestamp | identity | operation | path-or-dash | outcome [| detail]
//! ```
//!
//! The timestamp is UTC ISO 8601 with an explicit offset. The file is
//! opened in append mode for each write, so prior bytes are never
//! rewritten; growth failures propagate to the operation being audited.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::error::VaultError;

/// The operation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOperation {
    Init,
    Seal,
    Unseal,
    Store,
    Update,
    Retrieve,
    Delete,
    List,
    AddPolicy,
    RemovePolicy,
}

impl AuditOperation {
    /// The wire name of the operation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Seal => "seal",
            Self::Unseal => "unseal",
            Self::Store => "store",
            Self::Update => "update",
            Self::Retrieve => "retrieve",
            Self::Delete => "delete",
            Self::List => "list",
            Self::AddPolicy => "add-policy",
            Self::RemovePolicy => "remove-policy",
        }
    }
}

impl std::fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the audited operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    /// The operation completed.
    Success,
    /// The policy gate rejected the caller.
    Denied,
    /// The operation failed after passing (or before reaching) the gate.
    Error,
}

impl AuditOutcome {
    /// The wire name of the outcome.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appender and reader for one audit log file.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// An audit log at the given path. The file is created on first append.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry.
    ///
    /// The timestamp is captured at call time. `path` is recorded as `-`
    /// when absent (lifecycle and policy-management operations); `detail`
    /// adds a trailing field when supplied.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the line cannot be appended. The
    /// caller classifies this as an `error` outcome for its operation.
    pub fn append(
        &self,
        identity: &str,
        operation: AuditOperation,
        path: Option<&str>,
        outcome: AuditOutcome,
        detail: Option<&str>,
    ) -> Result<(), VaultError> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false);
        let path_field = match path {
            Some(p) if !p.is_empty() => p,
            _ => "-",
        };

        let mut line = format!("{timestamp} | {identity} | {operation} | {path_field} | {outcome}");
        if let Some(detail) = detail {
            line.push_str(" | ");
            line.push_str(detail);
        }
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Return raw entry lines, oldest first.
    ///
    /// With `last_n`, only the trailing N entries (fewer if the log is
    /// shorter).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::LogMissing`] when the log file does not exist,
    /// or [`VaultError::Io`] if it cannot be read.
    pub fn replay(&self, last_n: Option<usize>) -> Result<Vec<String>, VaultError> {
        if !self.path.exists() {
            return Err(VaultError::LogMissing {
                path: self.path.display().to_string(),
            });
        }

        let content = fs::read_to_string(&self.path)?;
        let mut lines: Vec<String> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect();

        if let Some(n) = last_n {
            if n < lines.len() {
                lines.drain(..lines.len() - n);
            }
        }
        Ok(lines)
    }
}
