// Bastion — Vault error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault already exists at {0} — refusing to overwrite")]
    AlreadyExists(PathBuf),

    #[error("Decryption failed — vault file was tampered with or the key is wrong")]
    DecryptionFailed,

    #[error("Invalid vault state: {0}")]
    InvalidState(&'static str),

    #[error("Key file error: {0}")]
    KeyFile(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
