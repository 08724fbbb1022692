//! Credential store (C1)
//!
//! Durable username → (salt, derived key) mapping, grounded in the source's
//! `UserStore`: a single JSON file, fully re-serialized on each change and
//! swapped in with a tmp-then-rename so a crash mid-write never corrupts it
//! (acceptable because writes only happen on account creation).

use crate::error::{RelayError, Result};
use parlor_crypto::kdf::pbkdf2::{self, Salt, DERIVED_KEY_LEN, SALT_LEN};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    salt: String,
    hash: String,
    created_at: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: HashMap<String, UserRecord>,
}

/// Durable credential store. Persistence happens on a blocking thread;
/// the in-memory map is guarded by a plain mutex held only across the
/// lookup/mutation itself, never across the file write.
pub struct CredentialStore {
    path: PathBuf,
    data: Mutex<UsersFile>,
}

impl CredentialStore {
    /// Load the store from `path`, treating an absent file as empty.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| RelayError::Persistence(format!("corrupt credential file: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => UsersFile::default(),
            Err(e) => return Err(RelayError::Persistence(format!("reading credential file: {e}"))),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Whether `username` is already registered.
    pub fn exists(&self, username: &str) -> bool {
        self.data.lock().unwrap().users.contains_key(username)
    }

    /// Register a new user with the given password. Returns `false` without
    /// modifying the store if the username is already taken.
    pub async fn add(&self, username: &str, password: &str) -> Result<bool> {
        if self.exists(username) {
            return Ok(false);
        }

        let password = password.to_string();
        let (salt, derived) = tokio::task::spawn_blocking(move || {
            let salt = pbkdf2::generate_salt();
            let derived = pbkdf2::derive(&password, &salt);
            (salt, derived)
        })
        .await
        .map_err(|e| RelayError::Persistence(format!("hashing task panicked: {e}")))?;

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut inserted = false;
        {
            let mut data = self.data.lock().unwrap();
            if !data.users.contains_key(username) {
                data.users.insert(
                    username.to_string(),
                    UserRecord {
                        salt: hex::encode(salt),
                        hash: hex::encode(derived),
                        created_at,
                    },
                );
                inserted = true;
            }
        }

        if inserted {
            self.persist().await?;
        }
        Ok(inserted)
    }

    /// Verify a password in constant time against the stored derived key.
    pub async fn verify(&self, username: &str, password: &str) -> bool {
        let record = {
            let data = self.data.lock().unwrap();
            data.users.get(username).cloned()
        };
        let Some(record) = record else { return false };

        let (Ok(salt_bytes), Ok(hash_bytes)) = (hex::decode(&record.salt), hex::decode(&record.hash))
        else {
            return false;
        };
        if salt_bytes.len() != SALT_LEN || hash_bytes.len() != DERIVED_KEY_LEN {
            return false;
        }
        let mut salt: Salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&salt_bytes);

        let password = password.to_string();
        tokio::task::spawn_blocking(move || pbkdf2::verify_or_err(&password, &salt, &hash_bytes))
            .await
            .map(|r| r.unwrap_or(false))
            .unwrap_or(false)
    }

    async fn persist(&self) -> Result<()> {
        let serialized = {
            let data = self.data.lock().unwrap();
            serde_json::to_string_pretty(&*data)
                .map_err(|e| RelayError::Persistence(format!("serializing credential file: {e}")))?
        };
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, serialized.as_bytes()))
            .await
            .map_err(|e| RelayError::Persistence(format!("persist task panicked: {e}")))??;
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)
        .map_err(|e| RelayError::Persistence(format!("writing temp credential file: {e}")))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| RelayError::Persistence(format!("renaming credential file: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("parlor-credentials-test-{name}-{}.json", std::process::id()))
    }

    #[tokio::test]
    async fn test_add_and_verify() {
        let path = temp_path("add-verify");
        let _ = std::fs::remove_file(&path);
        let store = CredentialStore::load(&path).unwrap();

        assert!(store.add("alice", "hunter2").await.unwrap());
        assert!(store.exists("alice"));
        assert!(store.verify("alice", "hunter2").await);
        assert!(!store.verify("alice", "wrong").await);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_duplicate_add_fails_without_modifying() {
        let path = temp_path("dup");
        let _ = std::fs::remove_file(&path);
        let store = CredentialStore::load(&path).unwrap();

        assert!(store.add("bob", "first").await.unwrap());
        assert!(!store.add("bob", "second").await.unwrap());
        assert!(store.verify("bob", "first").await);
        assert!(!store.verify("bob", "second").await);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let path = temp_path("missing");
        let _ = std::fs::remove_file(&path);
        let store = CredentialStore::load(&path).unwrap();
        assert!(!store.exists("nobody"));
        assert!(!store.verify("nobody", "x").await);
    }

    #[tokio::test]
    async fn test_persists_across_reload() {
        let path = temp_path("reload");
        let _ = std::fs::remove_file(&path);
        {
            let store = CredentialStore::load(&path).unwrap();
            store.add("carol", "pw").await.unwrap();
        }
        let reloaded = CredentialStore::load(&path).unwrap();
        assert!(reloaded.verify("carol", "pw").await);
        std::fs::remove_file(&path).ok();
    }
}
