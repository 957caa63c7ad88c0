//! Integration tests for the `lockbox` CLI binary.
//!
//! These drive the binary as a subprocess against a temp directory,
//! verifying exit codes, stdout/stderr text, and file-system side effects.
//! The engine needs no server or terminal, so the full lifecycle runs
//! end to end here.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Locate the `lockbox` binary built by `cargo test`.
fn lockbox_bin() -> String {
    let path = env!("CARGO_BIN_EXE_lockbox");
    assert!(Path::new(path).exists(), "lockbox binary not found at {path}");
    path.to_owned()
}

/// A vault in its own temp directory, with helpers for every verb.
struct TestVault {
    dir: TempDir,
}

impl TestVault {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    fn vault_file(&self) -> PathBuf {
        self.dir.path().join("vault.enc")
    }

    fn audit_file(&self) -> PathBuf {
        self.dir.path().join("audit.log")
    }

    /// Run lockbox with args and return (`exit_code`, stdout, stderr).
    fn run(&self, args: &[&str]) -> (i32, String, String) {
        let output = Command::new(lockbox_bin())
            .args(args)
            .output()
            .expect("failed to execute lockbox");
        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        (code, stdout, stderr)
    }

    fn run_with_files(&self, mut args: Vec<String>) -> (i32, String, String) {
        args.push("--vault-file".to_owned());
        args.push(self.vault_file().display().to_string());
        args.push("--audit-file".to_owned());
        args.push(self.audit_file().display().to_string());
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&refs)
    }

    fn init(&self, password: &str) -> (i32, String, String) {
        self.run_with_files(vec![
            "init".to_owned(),
            "--password".to_owned(),
            password.to_owned(),
        ])
    }

    fn unseal(&self, password: &str) -> (i32, String, String) {
        self.run_with_files(vec![
            "unseal".to_owned(),
            "--password".to_owned(),
            password.to_owned(),
        ])
    }

    fn seal(&self) -> (i32, String, String) {
        self.run_with_files(vec!["seal".to_owned()])
    }

    fn status(&self) -> (i32, String, String) {
        self.run(&["status", "--vault-file", &self.vault_file().display().to_string()])
    }

    fn put(&self, path: &str, value: &str, identity: &str) -> (i32, String, String) {
        self.run_with_files(vec![
            "put".to_owned(),
            path.to_owned(),
            value.to_owned(),
            "--identity".to_owned(),
            identity.to_owned(),
        ])
    }

    fn get(&self, path: &str, identity: &str, version: Option<u32>) -> (i32, String, String) {
        let mut args = vec![
            "get".to_owned(),
            path.to_owned(),
            "--identity".to_owned(),
            identity.to_owned(),
        ];
        if let Some(v) = version {
            args.push("--version".to_owned());
            args.push(v.to_string());
        }
        self.run_with_files(args)
    }

    fn delete(&self, path: &str, identity: &str) -> (i32, String, String) {
        self.run_with_files(vec![
            "delete".to_owned(),
            path.to_owned(),
            "--identity".to_owned(),
            identity.to_owned(),
        ])
    }

    fn list(&self, identity: &str, prefix: Option<&str>) -> (i32, String, String) {
        let mut args = vec!["list".to_owned()];
        if let Some(prefix) = prefix {
            args.push(prefix.to_owned());
        }
        args.push("--identity".to_owned());
        args.push(identity.to_owned());
        self.run_with_files(args)
    }

    fn add_policy(&self, identity: &str, pattern: &str, capabilities: &str) -> (i32, String, String) {
        self.run_with_files(vec![
            "add-policy".to_owned(),
            "--identity".to_owned(),
            identity.to_owned(),
            "--path-pattern".to_owned(),
            pattern.to_owned(),
            "--capabilities".to_owned(),
            capabilities.to_owned(),
        ])
    }

    fn remove_policy(&self, identity: &str, pattern: &str) -> (i32, String, String) {
        self.run_with_files(vec![
            "remove-policy".to_owned(),
            "--identity".to_owned(),
            identity.to_owned(),
            "--path-pattern".to_owned(),
            pattern.to_owned(),
        ])
    }

    fn audit_log(&self, last: Option<usize>) -> (i32, String, String) {
        let mut args = vec![
            "audit-log".to_owned(),
            "--audit-file".to_owned(),
            self.audit_file().display().to_string(),
        ];
        if let Some(n) = last {
            args.push("--last".to_owned());
            args.push(n.to_string());
        }
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&refs)
    }

    /// Init, unseal, and grant `admin` everything.
    fn open_with_admin(&self, password: &str) {
        assert_eq!(self.init(password).0, 0);
        assert_eq!(self.unseal(password).0, 0);
        assert_eq!(self.add_policy("admin", "**", "read,write,list,delete").0, 0);
    }
}

// ── version & help ───────────────────────────────────────────────────

#[test]
fn version_flag_exits_zero() {
    let vault = TestVault::new();
    let (code, stdout, _) = vault.run(&["--version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("lockbox"));
}

#[test]
fn help_lists_every_verb() {
    let vault = TestVault::new();
    let (code, stdout, _) = vault.run(&["--help"]);
    assert_eq!(code, 0);
    for verb in [
        "init", "unseal", "seal", "status", "put", "get", "delete", "list",
        "add-policy", "remove-policy", "audit-log",
    ] {
        assert!(stdout.contains(verb), "help should list '{verb}'");
    }
}

// ── lifecycle ────────────────────────────────────────────────────────

#[test]
fn init_and_unseal_a_new_vault() {
    let vault = TestVault::new();

    let (code, stdout, _) = vault.init("MMP1");
    assert_eq!(code, 0);
    assert!(stdout.contains("Vault initialized at"));
    assert!(vault.vault_file().exists());

    let (_, stdout, _) = vault.status();
    assert!(stdout.contains("Status: sealed"));

    let (code, stdout, _) = vault.unseal("MMP1");
    assert_eq!(code, 0);
    assert!(stdout.contains("Vault unsealed successfully."));

    let (_, stdout, _) = vault.status();
    assert!(stdout.contains("Status: unsealed"));
}

#[test]
fn wrong_password_is_rejected() {
    let vault = TestVault::new();
    vault.init("CorrectPW");

    let (code, _, stderr) = vault.unseal("WrongPW");
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Incorrect master password"));

    let (_, stdout, _) = vault.status();
    assert!(stdout.contains("Status: sealed"));

    let (_, log, _) = vault.audit_log(None);
    assert!(log.contains("unseal"));
    assert!(log.contains("error"));
}

#[test]
fn operations_fail_while_sealed() {
    let vault = TestVault::new();
    vault.init("MP1");
    vault.unseal("MP1");
    vault.add_policy("admin", "**", "write");
    vault.seal();

    let (code, _, stderr) = vault.put("secrets/key", "myvalue", "admin");
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Vault is sealed"));
}

#[test]
fn init_refuses_an_existing_vault() {
    let vault = TestVault::new();
    vault.init("NP1");

    let (code, _, stderr) = vault.init("NP1");
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Vault file already exists"));
}

#[test]
fn status_of_missing_vault_is_an_error() {
    let vault = TestVault::new();
    let (code, _, stderr) = vault.status();
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Vault file not found"));
}

#[test]
fn session_artifact_tracks_the_seal_state() {
    let vault = TestVault::new();
    vault.init("SP1");

    let session = vault.dir.path().join("vault.enc.session");
    assert!(!session.exists());

    vault.unseal("SP1");
    assert!(session.exists());

    vault.seal();
    assert!(!session.exists());
}

// ── secrets ──────────────────────────────────────────────────────────

#[test]
fn store_and_retrieve_roundtrip() {
    let vault = TestVault::new();
    vault.open_with_admin("MP1");

    let (code, stdout, _) = vault.put("production/db/password", "s3cretValue!", "admin");
    assert_eq!(code, 0);
    assert!(stdout.contains("Secret stored at production/db/password (version 1)"));

    let (code, stdout, _) = vault.get("production/db/password", "admin", None);
    assert_eq!(code, 0);
    for line in ["Path: production/db/password", "Version: 1", "Value: s3cretValue!"] {
        assert!(stdout.contains(line), "missing '{line}' in {stdout}");
    }
}

#[test]
fn versions_accumulate_and_stay_addressable() {
    let vault = TestVault::new();
    vault.open_with_admin("MP1");

    let (_, stdout, _) = vault.put("config/api-key", "key-v1", "admin");
    assert!(stdout.contains("Secret stored at config/api-key (version 1)"));
    let (_, stdout, _) = vault.put("config/api-key", "key-v2", "admin");
    assert!(stdout.contains("Secret updated at config/api-key (version 2)"));
    let (_, stdout, _) = vault.put("config/api-key", "key-v3", "admin");
    assert!(stdout.contains("Secret updated at config/api-key (version 3)"));

    let (_, stdout, _) = vault.get("config/api-key", "admin", None);
    assert!(stdout.contains("Version: 3"));
    assert!(stdout.contains("Value: key-v3"));

    let (_, stdout, _) = vault.get("config/api-key", "admin", Some(1));
    assert!(stdout.contains("Version: 1"));
    assert!(stdout.contains("Value: key-v1"));

    let (code, _, stderr) = vault.get("config/api-key", "admin", Some(99));
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Version 99 not found for path 'config/api-key'"));
}

#[test]
fn delete_removes_the_secret() {
    let vault = TestVault::new();
    vault.open_with_admin("MP1");
    vault.put("temp/api-key", "abc123", "admin");

    let (code, stdout, _) = vault.delete("temp/api-key", "admin");
    assert_eq!(code, 0);
    assert!(stdout.contains("Secret deleted at temp/api-key"));

    let (code, _, stderr) = vault.get("temp/api-key", "admin", None);
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Secret not found at path 'temp/api-key'"));
}

#[test]
fn list_filters_by_prefix() {
    let vault = TestVault::new();
    vault.open_with_admin("MP1");
    for (path, value) in [
        ("prod/db/user", "u1"),
        ("prod/db/pass", "p1"),
        ("prod/api/key", "k1"),
        ("staging/db/user", "u2"),
    ] {
        vault.put(path, value, "admin");
    }

    let (code, stdout, _) = vault.list("admin", Some("prod/db"));
    assert_eq!(code, 0);
    assert!(stdout.contains("prod/db/user"));
    assert!(stdout.contains("prod/db/pass"));
    assert!(!stdout.contains("prod/api/key"));
    assert!(!stdout.contains("staging/db/user"));
}

#[test]
fn empty_list_says_so() {
    let vault = TestVault::new();
    vault.init("MP1");
    vault.unseal("MP1");
    vault.add_policy("admin", "**", "list");

    let (code, stdout, _) = vault.list("admin", None);
    assert_eq!(code, 0);
    assert!(stdout.contains("No secrets found."));
}

#[test]
fn invalid_path_is_rejected() {
    let vault = TestVault::new();
    vault.open_with_admin("MP1");

    let (code, _, stderr) = vault.put("invalid//path", "value", "admin");
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Invalid path format"));
}

#[test]
fn secrets_persist_across_seal_cycles() {
    let vault = TestVault::new();
    vault.open_with_admin("PT1");
    vault.put("persist/secret", "persistent-value", "admin");

    vault.seal();
    vault.unseal("PT1");

    let (code, stdout, _) = vault.get("persist/secret", "admin", None);
    assert_eq!(code, 0);
    assert!(stdout.contains("Value: persistent-value"));
}

// ── access control ───────────────────────────────────────────────────

#[test]
fn default_deny_without_policies() {
    let vault = TestVault::new();
    vault.init("MP1");
    vault.unseal("MP1");

    let (code, _, stderr) = vault.put("secrets/key", "v", "anyone");
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Access denied"));

    let (_, log, _) = vault.audit_log(None);
    assert!(log.contains("store"));
    assert!(log.contains("denied"));
}

#[test]
fn single_star_wildcard_stays_in_one_segment() {
    let vault = TestVault::new();
    vault.init("MP1");
    vault.unseal("MP1");
    vault.add_policy("deployer", "production/*/credentials", "read,write");

    let (code, stdout, _) = vault.put("production/web/credentials", "web-cred", "deployer");
    assert_eq!(code, 0);
    assert!(stdout.contains("Secret stored at production/web/credentials (version 1)"));

    let (code, _, stderr) = vault.put("production/web/config", "web-config", "deployer");
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Access denied"));

    let (code, _, stderr) = vault.put("production/a/b/credentials", "x", "deployer");
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Access denied"));
}

#[test]
fn identities_are_isolated() {
    let vault = TestVault::new();
    vault.init("MP1");
    vault.unseal("MP1");
    vault.add_policy("service-a", "app-a/**", "read,write");
    vault.add_policy("service-b", "app-b/**", "read");
    vault.put("app-a/db/password", "secret123", "service-a");

    let (code, _, stderr) = vault.get("app-a/db/password", "service-b", None);
    assert_ne!(code, 0);
    assert!(stderr.contains(
        "Error: Access denied for identity 'service-b' on path 'app-a/db/password' (requires read)"
    ));

    let (code, stdout, _) = vault.get("app-a/db/password", "service-a", None);
    assert_eq!(code, 0);
    assert!(stdout.contains("Value: secret123"));
}

#[test]
fn invalid_capability_is_rejected_by_name() {
    let vault = TestVault::new();
    vault.init("MP1");
    vault.unseal("MP1");

    let (code, _, stderr) = vault.add_policy("test", "path/*", "read,execute");
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Invalid capability 'execute'"));
}

// ── policy management ────────────────────────────────────────────────

#[test]
fn add_and_remove_policy() {
    let vault = TestVault::new();
    vault.init("MP1");
    vault.unseal("MP1");

    let (code, stdout, _) = vault.add_policy("reader", "reports/*", "read,list");
    assert_eq!(code, 0);
    assert!(stdout.contains(
        "Policy added: identity='reader', path='reports/*', capabilities=[read, list]"
    ));

    let (code, stdout, _) = vault.remove_policy("reader", "reports/*");
    assert_eq!(code, 0);
    assert!(stdout.contains("Policy removed: identity='reader', path='reports/*'"));
}

#[test]
fn remove_missing_policy_is_an_error() {
    let vault = TestVault::new();
    vault.init("MP1");
    vault.unseal("MP1");

    let (code, _, stderr) = vault.remove_policy("phantom", "any/*");
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: No policy found"));
}

// ── audit log ────────────────────────────────────────────────────────

#[test]
fn audit_log_records_every_operation() {
    let vault = TestVault::new();
    vault.init("AP1");
    vault.unseal("AP1");
    vault.add_policy("admin", "**", "read,write");
    vault.put("audit/test", "val", "admin");
    vault.get("audit/test", "admin", None);
    vault.get("audit/test", "unauthorized", None);

    let (code, log, _) = vault.audit_log(None);
    assert_eq!(code, 0);
    for needle in ["init", "unseal", "store", "audit/test", "retrieve", "denied"] {
        assert!(log.contains(needle), "audit log should mention '{needle}'");
    }
    // ISO 8601 timestamps with an explicit offset.
    assert!(log.contains("+00:00"));
}

#[test]
fn audit_log_last_n_returns_the_tail() {
    let vault = TestVault::new();
    vault.init("AP1");
    vault.unseal("AP1");
    vault.seal();

    let (_, full, _) = vault.audit_log(None);
    assert_eq!(full.lines().count(), 3);

    let (_, tail, _) = vault.audit_log(Some(1));
    assert_eq!(tail.lines().count(), 1);
    assert!(tail.contains("seal"));
}

#[test]
fn audit_log_missing_file_is_an_error() {
    let vault = TestVault::new();
    let (code, _, stderr) = vault.audit_log(None);
    assert_ne!(code, 0);
    assert!(stderr.contains("Error: Audit log file not found"));
}
