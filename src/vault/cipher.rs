// Bastion — Vault Body Encryption
//
// AES-256-GCM with a 128-bit random nonce. The on-disk frame is
// `[16-byte nonce][ciphertext + tag]`; the authentication tag is verified
// on every read, so any tampering surfaces as DecryptionFailed rather
// than silently corrupt plaintext.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use rand::RngCore;

use super::key::MasterKey;
use super::VaultError;

/// Nonce size in bytes (128 bits, prefixed to the ciphertext).
pub const NONCE_SIZE: usize = 16;

/// AES-256-GCM instantiated with a 16-byte nonce.
type VaultAead = AesGcm<Aes256, U16>;

/// Stateless cipher over a borrowed master key.
pub struct Cipher<'a> {
    key: &'a MasterKey,
}

impl<'a> Cipher<'a> {
    pub fn new(key: &'a MasterKey) -> Self {
        Self { key }
    }

    /// Encrypt plaintext under a fresh random nonce, returning the framed
    /// `[nonce][ciphertext]` blob. The nonce is drawn from the OS RNG on
    /// every call; it is never derived or reused.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let aead = VaultAead::new_from_slice(self.key.as_bytes())
            .map_err(|e| VaultError::Crypto(format!("invalid key: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::<U16>::from_slice(&nonce_bytes);

        let ciphertext = aead
            .encrypt(nonce, plaintext)
            .map_err(|e| VaultError::Crypto(format!("encryption failed: {}", e)))?;

        let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);
        Ok(framed)
    }

    /// Decrypt a framed `[nonce][ciphertext]` blob, verifying the tag.
    pub fn decrypt(&self, framed: &[u8]) -> Result<Vec<u8>, VaultError> {
        if framed.len() <= NONCE_SIZE {
            return Err(VaultError::DecryptionFailed);
        }

        let aead = VaultAead::new_from_slice(self.key.as_bytes())
            .map_err(|e| VaultError::Crypto(format!("invalid key: {}", e)))?;

        let (nonce_bytes, ciphertext) = framed.split_at(NONCE_SIZE);
        let nonce = Nonce::<U16>::from_slice(nonce_bytes);

        aead.decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
