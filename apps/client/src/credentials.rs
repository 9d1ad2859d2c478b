use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{Credential, Profile};
use crate::signal::lock;

/// What survives a restart: the token plus the last known profile, which
/// fills in preferences the validated profile leaves out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCredential {
    pub token: Credential,
    #[serde(default)]
    pub profile: Option<Profile>,
}

/// Persistent credential storage. Only the session store writes to it.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<PersistedCredential>>;
    fn save(&self, credential: &PersistedCredential) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON file on disk.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<PersistedCredential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        match serde_json::from_str(&raw) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                // A corrupt file is the same as no credential.
                debug!("Ignoring unreadable credential file: {e}");
                Ok(None)
            }
        }
    }

    fn save(&self, credential: &PersistedCredential) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }
        let raw = serde_json::to_string_pretty(credential)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!("Persisted credential to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<PersistedCredential>>,
}

impl MemoryCredentialStore {
    pub fn with(credential: PersistedCredential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<PersistedCredential>> {
        Ok(lock(&self.slot).clone())
    }

    fn save(&self, credential: &PersistedCredential) -> Result<()> {
        *lock(&self.slot) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *lock(&self.slot) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdentityId;

    fn persisted() -> PersistedCredential {
        PersistedCredential {
            token: Credential::new("tok-1"),
            profile: Some(Profile {
                id: IdentityId::from("u-1"),
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                preferences: None,
            }),
        }
    }

    #[test]
    fn test_file_store_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested/credential.json"));

        assert!(store.load().unwrap().is_none());
        store.save(&persisted()).unwrap();
        assert_eq!(store.load().unwrap(), Some(persisted()));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_treats_garbage_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        std::fs::write(&path, "undefined").unwrap();

        let store = FileCredentialStore::new(path);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCredentialStore::with(persisted());
        assert_eq!(store.load().unwrap().unwrap().token, Credential::new("tok-1"));
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
