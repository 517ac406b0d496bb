// Bastion — Master Key Management
//
// The master key encrypts the whole vault body. It is generated from the
// OS RNG, persisted hex-encoded in a separate key file with owner-only
// permissions, and held in memory only while the vault is unsealed.
// Key material is zeroized on drop.

use std::fs;
use std::io::Write;
use std::path::Path;

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::VaultError;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// The symmetric master key for a vault (zeroized on drop).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Generate a fresh random 256-bit key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Load a key from a hex-encoded key file.
    pub fn load(path: &Path) -> Result<Self, VaultError> {
        let hex_str = fs::read_to_string(path)
            .map_err(|e| VaultError::KeyFile(format!("failed to read {}: {}", path.display(), e)))?;

        let raw = hex::decode(hex_str.trim())
            .map_err(|e| VaultError::KeyFile(format!("invalid hex in {}: {}", path.display(), e)))?;

        if raw.len() != KEY_SIZE {
            return Err(VaultError::KeyFile(format!(
                "key file {} holds {} bytes, expected {}",
                path.display(),
                raw.len(),
                KEY_SIZE
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&raw);
        Ok(Self { bytes })
    }

    /// Write the key hex-encoded to `path` with 0o600 permissions and fsync.
    ///
    /// The durability of this write gates key rotation: the vault is never
    /// re-encrypted under a key that has not reached disk.
    pub fn persist(&self, path: &Path) -> Result<(), VaultError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = fs::File::create(path)?;
        file.write_all(hex::encode(self.bytes).as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Create from raw bytes (test fixtures).
    #[cfg(test)]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_has_full_length() {
        let key = MasterKey::generate();
        assert_eq!(key.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = MasterKey::generate();
        let b = MasterKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes(), "Two generated keys must not collide");
    }

    #[test]
    fn test_persist_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.key");

        let key = MasterKey::generate();
        key.persist(&path).unwrap();

        let loaded = MasterKey::load(&path).unwrap();
        assert_eq!(key.as_bytes(), loaded.as_bytes());
    }

    #[test]
    fn test_key_file_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.key");
        MasterKey::generate().persist(&path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "Key file must be readable by owner only");
        }
    }

    #[test]
    fn test_load_rejects_truncated_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.key");
        std::fs::write(&path, "deadbeef").unwrap();

        let result = MasterKey::load(&path);
        assert!(matches!(result, Err(VaultError::KeyFile(_))));
    }

    #[test]
    fn test_load_rejects_non_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.key");
        std::fs::write(&path, "not hex at all, definitely not").unwrap();

        let result = MasterKey::load(&path);
        assert!(matches!(result, Err(VaultError::KeyFile(_))));
    }

    #[test]
    fn test_load_tolerates_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.key");

        let key = MasterKey::from_bytes([7u8; KEY_SIZE]);
        key.persist(&path).unwrap();

        // persist appends a newline; load must trim it
        let loaded = MasterKey::load(&path).unwrap();
        assert_eq!(loaded.as_bytes(), &[7u8; KEY_SIZE]);
    }
}
