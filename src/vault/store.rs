// Bastion — Encrypted Secret Vault
//
// Durable key/value secret storage with an explicit seal/unseal lifecycle.
// Persisted bytes are always ciphertext; plaintext and the master key live
// in memory only between unseal and seal. Callers must serialize mutating
// calls per instance — every mutation takes `&mut self`, so the borrow
// checker enforces single-writer discipline in-process.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cipher::Cipher;
use super::key::MasterKey;
use super::VaultError;

/// Decrypted vault body. Serialized as JSON, then encrypted as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultData {
    /// Incremented on every successful save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub secrets: BTreeMap<String, String>,
}

impl VaultData {
    fn empty() -> Self {
        let now = Utc::now();
        Self {
            version: 0,
            created_at: now,
            last_modified: now,
            secrets: BTreeMap::new(),
        }
    }
}

/// An encrypted secret vault backed by a single file.
pub struct VaultStore {
    vault_path: PathBuf,
    key_path: Option<PathBuf>,
    key: Option<MasterKey>,
    data: Option<VaultData>,
}

impl VaultStore {
    /// Create a new vault at `vault_path` with a freshly generated master
    /// key written to `key_path`. Fails with `AlreadyExists` if the vault
    /// file is already present. Returns a sealed handle.
    pub fn initialize(vault_path: &Path, key_path: &Path) -> Result<Self, VaultError> {
        if vault_path.exists() {
            return Err(VaultError::AlreadyExists(vault_path.to_path_buf()));
        }

        let key = MasterKey::generate();
        key.persist(key_path)?;

        let data = VaultData::empty();
        let plaintext = serde_json::to_vec(&data)?;
        let framed = Cipher::new(&key).encrypt(&plaintext)?;
        atomic_write(vault_path, &framed)?;

        tracing::info!(vault = %vault_path.display(), "Vault initialized");

        // The key goes out of scope here and is zeroized; the caller must
        // unseal explicitly before any secret operation.
        Ok(Self {
            vault_path: vault_path.to_path_buf(),
            key_path: Some(key_path.to_path_buf()),
            key: None,
            data: None,
        })
    }

    /// Open a sealed handle over an existing vault file.
    pub fn open(vault_path: &Path) -> Self {
        Self {
            vault_path: vault_path.to_path_buf(),
            key_path: None,
            key: None,
            data: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.key.is_none()
    }

    pub fn path(&self) -> &Path {
        &self.vault_path
    }

    /// Load the master key and decrypt the vault body into memory.
    /// A wrong key or a tampered file fails with `DecryptionFailed`.
    pub fn unseal(&mut self, key_path: &Path) -> Result<(), VaultError> {
        if !self.is_sealed() {
            return Err(VaultError::InvalidState("vault is already unsealed"));
        }

        let key = MasterKey::load(key_path)?;
        let framed = fs::read(&self.vault_path)?;
        let plaintext = Cipher::new(&key).decrypt(&framed)?;
        let data: VaultData = serde_json::from_slice(&plaintext)?;

        self.key = Some(key);
        self.key_path = Some(key_path.to_path_buf());
        self.data = Some(data);

        tracing::info!(vault = %self.vault_path.display(), "Vault unsealed");
        Ok(())
    }

    /// Persist the current state encrypted, then discard the key and
    /// plaintext from memory. After this call only ciphertext exists.
    pub fn seal(&mut self) -> Result<(), VaultError> {
        if self.is_sealed() {
            return Err(VaultError::InvalidState("vault is already sealed"));
        }

        self.persist()?;
        self.key = None; // MasterKey zeroizes on drop
        self.data = None;

        tracing::info!(vault = %self.vault_path.display(), "Vault sealed");
        Ok(())
    }

    /// Read access to the decrypted body. Requires unsealed.
    pub fn data(&self) -> Result<&VaultData, VaultError> {
        self.data
            .as_ref()
            .ok_or(VaultError::InvalidState("vault is sealed"))
    }

    /// Replace the full body and persist it under a fresh nonce.
    pub fn save(&mut self, mut data: VaultData) -> Result<(), VaultError> {
        if self.is_sealed() {
            return Err(VaultError::InvalidState("vault is sealed"));
        }

        data.last_modified = Utc::now();
        data.version += 1;
        self.data = Some(data);
        self.persist()
    }

    pub fn get_secret(&self, name: &str) -> Result<Option<&str>, VaultError> {
        Ok(self.data()?.secrets.get(name).map(String::as_str))
    }

    pub fn secret_names(&self) -> Result<Vec<String>, VaultError> {
        Ok(self.data()?.secrets.keys().cloned().collect())
    }

    pub fn set_secret(&mut self, name: &str, value: &str) -> Result<(), VaultError> {
        let mut data = self.data()?.clone();
        data.secrets.insert(name.to_string(), value.to_string());
        self.save(data)
    }

    /// Remove a secret. Returns true if it existed.
    pub fn delete_secret(&mut self, name: &str) -> Result<bool, VaultError> {
        let mut data = self.data()?.clone();
        let existed = data.secrets.remove(name).is_some();
        if existed {
            self.save(data)?;
        }
        Ok(existed)
    }

    /// Re-encrypt the vault under a newly generated key and swap key files.
    ///
    /// Ordering is load-bearing: the new key file is written and fsynced
    /// before the vault body is re-encrypted, so a crash at any point
    /// leaves the vault decryptable by a key that exists on disk.
    pub fn rotate_master_key(&mut self, new_key_path: &Path) -> Result<(), VaultError> {
        if self.is_sealed() {
            return Err(VaultError::InvalidState("vault is sealed"));
        }

        let new_key = MasterKey::generate();
        new_key.persist(new_key_path)?;

        let data = self.data()?;
        let plaintext = serde_json::to_vec(data)?;
        let framed = Cipher::new(&new_key).encrypt(&plaintext)?;
        atomic_write(&self.vault_path, &framed)?;

        self.key = Some(new_key);
        self.key_path = Some(new_key_path.to_path_buf());

        tracing::info!(
            vault = %self.vault_path.display(),
            key_file = %new_key_path.display(),
            "Master key rotated"
        );
        Ok(())
    }

    /// Write an encrypted snapshot of the current state to `path`.
    /// The snapshot uses the same framing and the active key, so plaintext
    /// never crosses the encryption boundary.
    pub fn backup(&self, path: &Path) -> Result<(), VaultError> {
        let key = self
            .key
            .as_ref()
            .ok_or(VaultError::InvalidState("vault is sealed"))?;
        let data = self.data()?;

        let plaintext = serde_json::to_vec(data)?;
        let framed = Cipher::new(key).encrypt(&plaintext)?;
        atomic_write(path, &framed)?;

        tracing::info!(snapshot = %path.display(), "Vault backup written");
        Ok(())
    }

    /// Replace the current state with a snapshot previously produced by
    /// `backup` under the active key, and persist it.
    pub fn restore(&mut self, path: &Path) -> Result<(), VaultError> {
        let key = self
            .key
            .as_ref()
            .ok_or(VaultError::InvalidState("vault is sealed"))?;

        let framed = fs::read(path)?;
        let plaintext = Cipher::new(key).decrypt(&framed)?;
        let data: VaultData = serde_json::from_slice(&plaintext)?;

        self.data = Some(data);
        self.persist()?;

        tracing::info!(snapshot = %path.display(), "Vault restored from backup");
        Ok(())
    }

    /// Encrypt the in-memory body and atomically replace the vault file.
    fn persist(&self) -> Result<(), VaultError> {
        let key = self
            .key
            .as_ref()
            .ok_or(VaultError::InvalidState("vault is sealed"))?;
        let data = self
            .data
            .as_ref()
            .ok_or(VaultError::InvalidState("vault is sealed"))?;

        let plaintext = serde_json::to_vec(data)?;
        let framed = Cipher::new(key).encrypt(&plaintext)?;
        atomic_write(&self.vault_path, &framed)
    }
}

/// Write via a temp file in the same directory, fsync, then rename.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = match path.file_name() {
        Some(name) => {
            let mut tmp = name.to_os_string();
            tmp.push(".tmp");
            path.with_file_name(tmp)
        }
        None => return Err(VaultError::Io(std::io::Error::other("path has no file name"))),
    };

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
