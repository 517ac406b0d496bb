// Bastion — CLI Command Handlers
//
// Each function handles one CLI subcommand. Vault commands unseal with
// the key file, perform the operation, and reseal before returning.
// The `serve` command keeps the vault unsealed and runs the gateway.

use std::path::PathBuf;
use std::sync::Arc;

use crate::audit::{AuditEntry, AuditFilter, AuditLog};
use crate::config::{data_dir, Config, ExecutorConfig};
use crate::error::BastionError;
use crate::executor::{ProcessRunner, ToolExecutor};
use crate::gateway::{RequestGateway, UdsServer};
use crate::handler::BackendHandler;
use crate::vault::VaultStore;

use super::{AuditCommands, Cli, Commands};

const CLI_ACTOR: &str = "bastion-cli";

/// Path to the encrypted vault file.
fn vault_path(cli: &Cli) -> PathBuf {
    cli.vault_file
        .clone()
        .unwrap_or_else(|| data_dir().join("secrets.vault"))
}

/// Path to the master key file.
fn key_path(cli: &Cli) -> PathBuf {
    cli.key_file
        .clone()
        .unwrap_or_else(|| data_dir().join("vault.key"))
}

fn audit_log() -> AuditLog {
    AuditLog::new(&data_dir().join("audit.log"))
}

/// Execute the parsed CLI command.
pub async fn execute(cli: Cli) -> Result<(), BastionError> {
    match &cli.command {
        Commands::Init => cmd_init(&cli),
        Commands::Set { name, value } => cmd_set(&cli, name, value),
        Commands::Get { name, reveal } => cmd_get(&cli, name, *reveal),
        Commands::List => cmd_list(&cli),
        Commands::Delete { name } => cmd_delete(&cli, name),
        Commands::RotateKey { new_key_file } => cmd_rotate_key(&cli, new_key_file),
        Commands::Backup { path } => cmd_backup(&cli, path),
        Commands::Restore { path } => cmd_restore(&cli, path),
        Commands::Audit { command } => cmd_audit(command),
        Commands::Scan { path, kind } => cmd_scan(path, kind).await,
        Commands::Serve { socket, config } => cmd_serve(&cli, socket.clone(), config.clone()).await,
    }
}

// ─── Init ────────────────────────────────────────────────────────────────────

fn cmd_init(cli: &Cli) -> Result<(), BastionError> {
    let vault = vault_path(cli);
    let key = key_path(cli);
    std::fs::create_dir_all(data_dir())?;

    VaultStore::initialize(&vault, &key)?;

    println!("✓ Vault initialized");
    println!("  Vault file: {}", vault.display());
    println!("  Key file:   {}", key.display());
    println!();
    println!("Next: store a secret with `bastion set <name> --value <secret>`");

    Ok(())
}

// ─── Secret CRUD ─────────────────────────────────────────────────────────────

fn cmd_set(cli: &Cli, name: &str, value: &str) -> Result<(), BastionError> {
    let mut vault = open_unsealed(cli)?;
    vault.set_secret(name, value)?;
    vault.seal()?;

    record(AuditEntry::new(
        CLI_ACTOR,
        "secret_write",
        &format!("vault:secret:{}", name),
        true,
    ));

    println!("✓ Secret '{}' stored", name);
    Ok(())
}

fn cmd_get(cli: &Cli, name: &str, reveal: bool) -> Result<(), BastionError> {
    let mut vault = open_unsealed(cli)?;
    let value = vault.get_secret(name)?.map(str::to_string);
    vault.seal()?;

    match value {
        Some(value) => {
            if reveal {
                record(AuditEntry::new(
                    CLI_ACTOR,
                    "secret_read",
                    &format!("vault:secret:{}", name),
                    true,
                ));
                println!("{}", value);
            } else {
                println!("{}: [REDACTED]  (use --reveal to print the value)", name);
            }
        }
        None => println!("Secret not found: {}", name),
    }

    Ok(())
}

fn cmd_list(cli: &Cli) -> Result<(), BastionError> {
    let mut vault = open_unsealed(cli)?;
    let names = vault.secret_names()?;
    vault.seal()?;

    if names.is_empty() {
        println!("No secrets stored yet.");
        println!("Add one with: bastion set <name> --value <secret>");
        return Ok(());
    }

    println!("Stored secrets ({}):", names.len());
    for name in names {
        println!("  {}", name);
    }

    Ok(())
}

fn cmd_delete(cli: &Cli, name: &str) -> Result<(), BastionError> {
    let mut vault = open_unsealed(cli)?;
    let existed = vault.delete_secret(name)?;
    vault.seal()?;

    if existed {
        record(AuditEntry::new(
            CLI_ACTOR,
            "secret_delete",
            &format!("vault:secret:{}", name),
            true,
        ));
        println!("✓ Secret '{}' deleted", name);
    } else {
        println!("Secret not found: {}", name);
    }

    Ok(())
}

// ─── Key Rotation, Backup, Restore ───────────────────────────────────────────

fn cmd_rotate_key(cli: &Cli, new_key_file: &PathBuf) -> Result<(), BastionError> {
    let mut vault = open_unsealed(cli)?;
    vault.rotate_master_key(new_key_file)?;
    vault.seal()?;

    record(AuditEntry::new(CLI_ACTOR, "key_rotate", "vault", true));

    println!("✓ Master key rotated");
    println!("  New key file: {}", new_key_file.display());
    println!("  The old key file no longer decrypts this vault — retire it.");
    println!("  Pass --key-file {} on subsequent commands.", new_key_file.display());

    Ok(())
}

fn cmd_backup(cli: &Cli, path: &PathBuf) -> Result<(), BastionError> {
    let mut vault = open_unsealed(cli)?;
    vault.backup(path)?;
    vault.seal()?;

    record(AuditEntry::new(CLI_ACTOR, "vault_backup", "vault", true));

    println!("✓ Encrypted snapshot written to {}", path.display());
    println!("  The snapshot decrypts only with the current key file.");
    Ok(())
}

fn cmd_restore(cli: &Cli, path: &PathBuf) -> Result<(), BastionError> {
    let mut vault = open_unsealed(cli)?;
    vault.restore(path)?;
    vault.seal()?;

    record(AuditEntry::new(CLI_ACTOR, "vault_restore", "vault", true));

    println!("✓ Vault restored from {}", path.display());
    Ok(())
}

// ─── Audit ───────────────────────────────────────────────────────────────────

fn cmd_audit(command: &AuditCommands) -> Result<(), BastionError> {
    let log = audit_log();

    match command {
        AuditCommands::Query { action, actor, limit } => {
            let entries = log.query(&AuditFilter {
                action: action.clone(),
                actor: actor.clone(),
                limit: Some(*limit),
                ..Default::default()
            })?;

            if entries.is_empty() {
                println!("No matching audit entries.");
                return Ok(());
            }

            for entry in entries {
                let status = if entry.success { "ok" } else { "FAIL" };
                println!(
                    "[{}] {:4} {} {} by {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    status,
                    entry.action,
                    entry.resource,
                    entry.actor,
                );
            }
        }
        AuditCommands::Stats { days } => {
            let stats = log.stats(*days)?;
            println!("Audit statistics, last {} days:", days);
            println!("  Total events: {}", stats.total_events);
            println!("  Success rate: {:.1}%", stats.success_rate * 100.0);
            if !stats.top_actors.is_empty() {
                println!("  Top actors:");
                for (actor, count) in &stats.top_actors {
                    println!("    {:6}  {}", count, actor);
                }
            }
            if !stats.top_actions.is_empty() {
                println!("  Top actions:");
                for (action, count) in &stats.top_actions {
                    println!("    {:6}  {}", count, action);
                }
            }
        }
        AuditCommands::Export { path } => {
            let written = log.export(path, &AuditFilter::default())?;
            println!("✓ Exported {} entries to {}", written, path.display());
        }
        AuditCommands::Sweep { retention_days } => {
            let dropped = log.retention_sweep(*retention_days)?;
            println!("✓ Retention sweep dropped {} entries", dropped);
        }
    }

    Ok(())
}

// ─── Scan ────────────────────────────────────────────────────────────────────

async fn cmd_scan(path: &PathBuf, kind: &str) -> Result<(), BastionError> {
    let tool_name = match kind {
        "secrets" => "scan_secrets",
        "vulnerabilities" => "scan_vulnerabilities",
        other => {
            return Err(BastionError::Other(format!(
                "Unknown scan kind '{}'. Use 'secrets' or 'vulnerabilities'.",
                other
            )))
        }
    };

    let root = std::fs::canonicalize(path)?;
    let audit = Arc::new(audit_log());
    let executor = ToolExecutor::new(
        ExecutorConfig {
            allowed_paths: vec![root.clone()],
            ..Default::default()
        },
        audit,
        Arc::new(ProcessRunner),
    );

    let params = serde_json::json!({ "path": root.to_string_lossy() });
    let outcome = executor
        .execute("cli", tool_name, &params, CLI_ACTOR)
        .await?;

    let Some(data) = outcome.data else {
        return Err(BastionError::Other(
            outcome.error.unwrap_or_else(|| "Scan failed".to_string()),
        ));
    };

    let findings = data["findings"].as_array().cloned().unwrap_or_default();
    println!(
        "Scanned {} files under {} ({} skipped)",
        data["files_scanned"], root.display(), data["files_skipped"],
    );

    if findings.is_empty() {
        println!("No findings.");
        return Ok(());
    }

    println!("{} findings:", findings.len());
    for finding in findings {
        println!(
            "  [{}] {} {}:{} ({}, confidence {:.2})",
            finding["severity"].as_str().unwrap_or("?"),
            finding["rule_id"].as_str().unwrap_or("?"),
            finding["file"].as_str().unwrap_or("?"),
            finding["line"],
            finding["excerpt"].as_str().unwrap_or(""),
            finding["confidence"].as_f64().unwrap_or(0.0),
        );
    }

    Ok(())
}

// ─── Serve ───────────────────────────────────────────────────────────────────

async fn cmd_serve(
    cli: &Cli,
    socket: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<(), BastionError> {
    let config = match config_path {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    if config.gateway.auth_enabled && config.gateway.api_keys.is_empty() {
        tracing::warn!(
            "Authentication is enabled but no API keys are configured — every request will be rejected"
        );
    }

    let vault = open_unsealed(cli)?;
    let audit = Arc::new(audit_log());

    let executor = Arc::new(ToolExecutor::new(
        config.executor.clone(),
        audit.clone(),
        Arc::new(ProcessRunner),
    ));
    let handler = Arc::new(BackendHandler::new(vault, executor, audit.clone()));
    let gateway = Arc::new(RequestGateway::new(config.gateway, audit, handler));

    let socket_path = socket.unwrap_or_else(UdsServer::default_socket_path);
    println!("Starting Bastion gateway at {}...", socket_path.display());

    let server = UdsServer::new(gateway, socket_path);
    server.run().await?;

    Ok(())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Open the vault and unseal it with the configured key file.
fn open_unsealed(cli: &Cli) -> Result<VaultStore, BastionError> {
    let path = vault_path(cli);
    if !path.exists() {
        return Err(BastionError::Other(format!(
            "Vault not found at {}. Run `bastion init` first.",
            path.display()
        )));
    }

    let mut vault = VaultStore::open(&path);
    vault.unseal(&key_path(cli))?;
    Ok(vault)
}

/// Best-effort audit write for CLI actions.
fn record(entry: AuditEntry) {
    if let Err(e) = audit_log().append(&entry) {
        tracing::error!(error = %e, "Failed to write audit entry");
    }
}
