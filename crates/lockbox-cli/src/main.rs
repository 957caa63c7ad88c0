//! Lockbox CLI — command-line shell over the `lockbox-core` engine.
//!
//! A thin layer: parse arguments, prompt for passwords with no echo when
//! they are not given inline, dispatch to the engine, format results on
//! stdout. Every error goes to stderr with an `Error: ` prefix and a
//! nonzero exit code.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};

use lockbox_core::policy::Capability;
use lockbox_core::vault::Vault;

// ── CLI structure ────────────────────────────────────────────────────

/// Lockbox — a local envelope-encrypted secret store.
#[derive(Parser)]
#[command(
    name = "lockbox",
    version,
    about = "Lockbox CLI — manage secrets, policies, and the audit trail",
    long_about = None,
    after_help = "Examples:\n  \
        lockbox init\n  \
        lockbox unseal\n  \
        lockbox put production/db/password s3cret --identity admin\n  \
        lockbox get production/db/password --identity admin\n  \
        lockbox add-policy --identity admin --path-pattern '**' --capabilities read,write,list,delete\n  \
        lockbox audit-log --last 20"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Paths to the two persistent artifacts.
#[derive(Args)]
struct StoreArgs {
    /// Path to the encrypted vault store.
    #[arg(long, default_value = "vault.enc")]
    vault_file: PathBuf,

    /// Path to the append-only audit log.
    #[arg(long, default_value = "audit.log")]
    audit_file: PathBuf,
}

impl StoreArgs {
    fn vault(&self) -> Vault {
        Vault::new(&self.vault_file, &self.audit_file)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new vault (left sealed).
    Init {
        #[command(flatten)]
        files: StoreArgs,
        /// Master password. Prompted without echo when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Unseal the vault with the master password.
    Unseal {
        #[command(flatten)]
        files: StoreArgs,
        /// Master password. Prompted without echo when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Seal the vault, discarding the root key.
    Seal {
        #[command(flatten)]
        files: StoreArgs,
    },
    /// Show whether the vault is sealed or unsealed.
    Status {
        /// Path to the encrypted vault store.
        #[arg(long, default_value = "vault.enc")]
        vault_file: PathBuf,
    },
    /// Store a secret, or add a new version to an existing one.
    Put {
        /// Secret path (e.g., production/db/password).
        path: String,
        /// Secret value.
        value: String,
        /// Caller identity for access control.
        #[arg(long)]
        identity: String,
        #[command(flatten)]
        files: StoreArgs,
    },
    /// Retrieve a secret, latest version by default.
    Get {
        /// Secret path.
        path: String,
        /// Caller identity for access control.
        #[arg(long)]
        identity: String,
        /// Specific version number to retrieve.
        #[arg(long)]
        version: Option<u32>,
        #[command(flatten)]
        files: StoreArgs,
    },
    /// Delete a secret and all of its versions.
    Delete {
        /// Secret path.
        path: String,
        /// Caller identity for access control.
        #[arg(long)]
        identity: String,
        #[command(flatten)]
        files: StoreArgs,
    },
    /// List secret paths, optionally under a prefix.
    List {
        /// Path prefix filter. Lists everything when omitted.
        prefix: Option<String>,
        /// Caller identity for access control.
        #[arg(long)]
        identity: String,
        #[command(flatten)]
        files: StoreArgs,
    },
    /// Add an access control policy.
    #[command(name = "add-policy")]
    AddPolicy {
        /// Identity the policy applies to.
        #[arg(long)]
        identity: String,
        /// Path pattern; `*` matches within a segment, `**` across segments.
        #[arg(long)]
        path_pattern: String,
        /// Comma-separated capabilities: read, write, list, delete.
        #[arg(long)]
        capabilities: String,
        #[command(flatten)]
        files: StoreArgs,
    },
    /// Remove the policy matching an identity and pattern exactly.
    #[command(name = "remove-policy")]
    RemovePolicy {
        /// Identity of the policy to remove.
        #[arg(long)]
        identity: String,
        /// Path pattern of the policy to remove.
        #[arg(long)]
        path_pattern: String,
        #[command(flatten)]
        files: StoreArgs,
    },
    /// Print audit log entries.
    #[command(name = "audit-log")]
    AuditLog {
        /// Path to the append-only audit log.
        #[arg(long, default_value = "audit.log")]
        audit_file: PathBuf,
        /// Only the trailing N entries.
        #[arg(long)]
        last: Option<usize>,
    },
}

// ── entry point ──────────────────────────────────────────────────────

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Init { files, password } => {
            let password = resolve_password(password)?;
            let vault = files.vault();
            vault.init(&password)?;
            println!("Vault initialized at {}", files.vault_file.display());
        }
        Commands::Unseal { files, password } => {
            let password = resolve_password(password)?;
            files.vault().unseal(&password)?;
            println!("Vault unsealed successfully.");
        }
        Commands::Seal { files } => {
            files.vault().seal()?;
            println!("Vault sealed.");
        }
        Commands::Status { vault_file } => {
            let vault = Vault::new(&vault_file, PathBuf::new());
            let status = vault.status();
            if !status.exists {
                bail!("Vault file not found at {}", vault_file.display());
            }
            if status.unsealed {
                println!("Status: unsealed");
            } else {
                println!("Status: sealed");
            }
        }
        Commands::Put {
            path,
            value,
            identity,
            files,
        } => {
            let stored = files.vault().put(&path, &value, &identity)?;
            if stored.created {
                println!("Secret stored at {} (version {})", stored.path, stored.version);
            } else {
                println!("Secret updated at {} (version {})", stored.path, stored.version);
            }
        }
        Commands::Get {
            path,
            identity,
            version,
            files,
        } => {
            let secret = files.vault().get(&path, &identity, version)?;
            println!("Path: {}", secret.path);
            println!("Version: {}", secret.version);
            println!("Value: {}", secret.value);
        }
        Commands::Delete {
            path,
            identity,
            files,
        } => {
            files.vault().delete(&path, &identity)?;
            println!("Secret deleted at {path}");
        }
        Commands::List {
            prefix,
            identity,
            files,
        } => {
            let paths = files.vault().list(&identity, prefix.as_deref().unwrap_or(""))?;
            if paths.is_empty() {
                println!("No secrets found.");
            } else {
                for path in paths {
                    println!("{path}");
                }
            }
        }
        Commands::AddPolicy {
            identity,
            path_pattern,
            capabilities,
            files,
        } => {
            let capabilities = parse_capabilities(&capabilities)?;
            files.vault().add_policy(&identity, &path_pattern, &capabilities)?;
            let names: Vec<String> = capabilities.iter().map(ToString::to_string).collect();
            println!(
                "Policy added: identity='{identity}', path='{path_pattern}', capabilities=[{}]",
                names.join(", ")
            );
        }
        Commands::RemovePolicy {
            identity,
            path_pattern,
            files,
        } => {
            files.vault().remove_policy(&identity, &path_pattern)?;
            println!("Policy removed: identity='{identity}', path='{path_pattern}'");
        }
        Commands::AuditLog { audit_file, last } => {
            let log = lockbox_core::audit::AuditLog::new(&audit_file);
            for line in log.replay(last)? {
                println!("{line}");
            }
        }
    }
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────

/// Use the inline password when given, otherwise prompt with no echo.
fn resolve_password(inline: Option<String>) -> Result<String> {
    match inline {
        Some(password) => Ok(password),
        None => {
            eprint!("Master password: ");
            std::io::stderr().flush()?;
            Ok(rpassword::read_password()?)
        }
    }
}

/// Parse a comma-separated capability list.
fn parse_capabilities(input: &str) -> Result<Vec<Capability>> {
    input
        .split(',')
        .map(str::trim)
        .map(|name| name.parse::<Capability>().map_err(Into::into))
        .collect()
}
