//! Filesystem-backed store: one `<name>.p8` file per key record.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{KeychainError, Result};
use crate::store::{ds_key, name_of, Store, KEY_EXTENSION};

/// Directory store for key records.
///
/// Records are written with 0600 permissions on Unix. The store has no
/// batch facility; rename on top of it runs the two-step fallback whose
/// failure window leaves both names present, never neither.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a key record directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            KeychainError::StoreIo(format!(
                "failed to create key store directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let name = name_of(key);
        // The chain validates names, but a record path must never
        // escape the store root regardless of caller.
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(KeychainError::StoreIo(format!(
                "refusing store key '{key}'"
            )));
        }
        Ok(self.root.join(format!("{name}.{KEY_EXTENSION}")))
    }
}

#[async_trait]
impl Store for FsStore {
    async fn has(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(KeychainError::KeyNotFound(name_of(key).to_string()))
            }
            Err(e) => Err(KeychainError::StoreIo(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::write(&path, value).await.map_err(|e| {
            KeychainError::StoreIo(format!("failed to write {}: {}", path.display(), e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(KeychainError::KeyNotFound(name_of(key).to_string()))
            }
            Err(e) => Err(KeychainError::StoreIo(format!(
                "failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn query_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(ds_key(stem));
            }
        }
        Ok(keys)
    }

    fn resolve_path(&self, key: &str) -> Option<PathBuf> {
        self.path_for(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        store.put("/alpha", b"record").await.unwrap();
        assert!(store.has("/alpha").await.unwrap());
        assert_eq!(store.get("/alpha").await.unwrap(), b"record");
        assert!(dir.path().join("alpha.p8").exists());

        let keys = store.query_keys().await.unwrap();
        assert_eq!(keys, vec!["/alpha"]);

        store.delete("/alpha").await.unwrap();
        assert!(!store.has("/alpha").await.unwrap());
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.get("/ghost").await.unwrap_err(),
            KeychainError::KeyNotFound(name) if name == "ghost"
        ));
        assert!(matches!(
            store.delete("/ghost").await.unwrap_err(),
            KeychainError::KeyNotFound(_)
        ));
    }

    #[tokio::test]
    async fn traversal_keys_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(store.put("/../escape", b"x").await.is_err());
        assert!(store.resolve_path("/../escape").is_none());
    }

    #[tokio::test]
    async fn non_p8_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        tokio::fs::write(dir.path().join("README.txt"), b"not a key")
            .await
            .unwrap();
        store.put("/only", b"record").await.unwrap();
        assert_eq!(store.query_keys().await.unwrap(), vec!["/only"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn records_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.put("/secret", b"record").await.unwrap();
        let mode = std::fs::metadata(dir.path().join("secret.p8"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
