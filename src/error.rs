// Bastion — Top-level error types
//
// Aggregates errors from the vault, audit, gateway, and executor modules
// into a single enum for the application boundary.

use thiserror::Error;

/// Top-level error type for all Bastion operations.
#[derive(Debug, Error)]
pub enum BastionError {
    #[error("Vault error: {0}")]
    Vault(#[from] crate::vault::VaultError),

    #[error("Audit error: {0}")]
    Audit(#[from] crate::audit::AuditError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),

    #[error("Executor error: {0}")]
    Executor(#[from] crate::executor::ExecutorError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BastionError>;
