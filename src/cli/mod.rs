// Bastion — CLI Module
//
// Command-line interface using clap derive macros.
// Subcommands: init, set, get, list, delete, rotate-key, backup,
// restore, audit, scan, serve.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::execute;

/// Bastion — encrypted secrets backend with an audit trail.
#[derive(Parser, Debug)]
#[command(name = "bastion")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the encrypted vault file (default: data dir).
    #[arg(long, global = true)]
    pub vault_file: Option<PathBuf>,

    /// Path to the hex-encoded master key file (default: data dir).
    #[arg(long, global = true)]
    pub key_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new vault: generate the master key and an empty
    /// encrypted vault file.
    Init,

    /// Store a secret in the vault.
    Set {
        /// The secret name (e.g. "DB_PASSWORD").
        name: String,

        /// The secret value.
        /// For production use, prefer interactive entry to avoid shell
        /// history exposure.
        #[arg(long)]
        value: String,
    },

    /// Read a secret. The value is redacted unless --reveal is passed;
    /// revealed reads are audit-logged.
    Get {
        name: String,

        #[arg(long, default_value = "false")]
        reveal: bool,
    },

    /// List stored secret names (never values).
    List,

    /// Delete a secret by name.
    Delete { name: String },

    /// Re-encrypt the vault under a freshly generated master key.
    RotateKey {
        /// Where to write the new key file.
        #[arg(long)]
        new_key_file: PathBuf,
    },

    /// Write an encrypted snapshot of the vault.
    Backup { path: PathBuf },

    /// Replace the vault contents from an encrypted snapshot.
    Restore { path: PathBuf },

    /// Inspect the audit log.
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },

    /// Scan a directory for leaked credentials or vulnerable patterns.
    Scan {
        path: PathBuf,

        /// "secrets" or "vulnerabilities".
        #[arg(long, default_value = "secrets")]
        kind: String,
    },

    /// Unseal the vault and serve the gateway over a Unix domain socket.
    Serve {
        /// Socket path (default: $XDG_RUNTIME_DIR/bastion/bastion.sock).
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Optional JSON config file for gateway/executor policy.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuditCommands {
    /// Query entries, newest first.
    Query {
        #[arg(long)]
        action: Option<String>,

        #[arg(long)]
        actor: Option<String>,

        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Aggregate statistics over a trailing window.
    Stats {
        #[arg(long, default_value = "30")]
        days: u32,
    },

    /// Export filtered entries as CSV (secrets redacted).
    Export { path: PathBuf },

    /// Drop entries older than the retention horizon.
    Sweep {
        #[arg(long, default_value = "90")]
        retention_days: u32,
    },
}
