// Bastion — Vault Module
//
// Encrypted-at-rest secret storage with an explicit seal/unseal lifecycle.
// The master key lives in a separate hex-encoded key file; the vault file
// is a single AES-256-GCM frame.

mod cipher;
mod error;
mod key;
mod store;

pub use cipher::NONCE_SIZE;
pub use error::VaultError;
pub use key::{MasterKey, KEY_SIZE};
pub use store::{VaultData, VaultStore};
