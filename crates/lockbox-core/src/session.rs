//! Session carrier for Lockbox.
//!
//! The root key must survive between short-lived CLI invocations while the
//! vault is unsealed. The carrier is a sibling file next to the store
//! (`<vault-file>.session`) holding the hex-encoded root key and nothing
//! else. The file's presence IS the unsealed signal: `unseal` creates it,
//! `seal` removes it, and every operation re-reads it for the duration of
//! that operation only.
//!
//! Intermediate buffers holding key material are zeroized before release.

use std::fs;
use std::path::{Path, PathBuf};

use zeroize::Zeroize;

use crate::crypto::{RootKey, KEY_LEN};
use crate::error::VaultError;

/// Handle to the session artifact beside a store file.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    /// The session artifact for the given store file (`<store>.session`).
    #[must_use]
    pub fn beside(vault_file: &Path) -> Self {
        let mut name = vault_file.as_os_str().to_owned();
        name.push(".session");
        Self { path: PathBuf::from(name) }
    }

    /// Whether a session is currently active.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Publish the root key, marking the vault unsealed.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the artifact cannot be written.
    pub fn put(&self, key: &RootKey) -> Result<(), VaultError> {
        let mut encoded = hex::encode(key.as_bytes());
        fs::write(&self.path, &encoded)?;
        encoded.zeroize();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Fetch the root key, or `None` when the vault is sealed.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StoreCorrupt`] if the artifact exists but does
    /// not decode to a 32-byte key, and [`VaultError::Io`] on read failure.
    pub fn get(&self) -> Result<Option<RootKey>, VaultError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut text = fs::read_to_string(&self.path)?;
        let decoded = hex::decode(text.trim());
        text.zeroize();
        let mut bytes = decoded.map_err(|_| VaultError::StoreCorrupt {
            reason: "session artifact is not valid hex".to_owned(),
        })?;

        if bytes.len() != KEY_LEN {
            bytes.zeroize();
            return Err(VaultError::StoreCorrupt {
                reason: "session artifact does not hold a 32-byte key".to_owned(),
            });
        }

        let mut raw = [0u8; KEY_LEN];
        raw.copy_from_slice(&bytes);
        bytes.zeroize();
        let key = RootKey::from_bytes(raw);
        raw.zeroize();
        Ok(Some(key))
    }

    /// Remove the session artifact, sealing the vault. A no-op when absent.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the artifact exists but cannot be
    /// removed.
    pub fn clear(&self) -> Result<(), VaultError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn session_in_temp_dir() -> (SessionFile, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionFile::beside(&dir.path().join("vault.enc"));
        (session, dir)
    }

    #[test]
    fn path_is_store_path_plus_suffix() {
        let session = SessionFile::beside(Path::new("/tmp/vault.enc"));
        assert!(!session.exists());
        assert_eq!(
            SessionFile::beside(Path::new("vault.enc")).path,
            PathBuf::from("vault.enc.session")
        );
    }

    #[test]
    fn put_get_roundtrip() {
        let (session, _dir) = session_in_temp_dir();
        let key = RootKey::from_bytes([0xAB; KEY_LEN]);

        session.put(&key).unwrap();
        assert!(session.exists());

        let loaded = session.get().unwrap().unwrap();
        assert_eq!(loaded.as_bytes(), key.as_bytes());
    }

    #[test]
    fn get_without_put_is_none() {
        let (session, _dir) = session_in_temp_dir();
        assert!(session.get().unwrap().is_none());
    }

    #[test]
    fn clear_removes_the_artifact() {
        let (session, _dir) = session_in_temp_dir();
        session.put(&RootKey::from_bytes([1; KEY_LEN])).unwrap();
        session.clear().unwrap();
        assert!(!session.exists());
        assert!(session.get().unwrap().is_none());
    }

    #[test]
    fn clear_when_absent_is_a_no_op() {
        let (session, _dir) = session_in_temp_dir();
        assert!(session.clear().is_ok());
    }

    #[test]
    fn malformed_artifact_is_corrupt() {
        let (session, _dir) = session_in_temp_dir();
        fs::write(&session.path, "definitely-not-hex").unwrap();
        let err = session.get().unwrap_err();
        assert!(matches!(err, VaultError::StoreCorrupt { .. }));
    }

    #[test]
    fn short_key_is_corrupt() {
        let (session, _dir) = session_in_temp_dir();
        fs::write(&session.path, "abcd1234").unwrap();
        let err = session.get().unwrap_err();
        assert!(matches!(err, VaultError::StoreCorrupt { .. }));
    }

    #[test]
    fn artifact_holds_hex_of_the_key() {
        let (session, _dir) = session_in_temp_dir();
        session.put(&RootKey::from_bytes([0x0F; KEY_LEN])).unwrap();
        let text = fs::read_to_string(&session.path).unwrap();
        assert_eq!(text, "0f".repeat(KEY_LEN));
    }
}
