//! Filesystem object store
//!
//! Each key maps to a file under the root directory. Writes are staged in a
//! hidden `.staging` directory and moved into place, so readers never observe
//! a partially written object. `put_if_absent` publishes the staged file with
//! a hard link, which fails atomically when the target already exists.

use crate::key::validate_key;
use crate::metrics::observe;
use crate::{Error, ObjectStore, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

const STAGING_DIR: &str = ".staging";

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store, creating the root directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING_DIR))
            .await
            .map_err(|e| Error::io(&root.display().to_string(), e))?;
        debug!(root = %root.display(), "Opened filesystem store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }

    /// Write `value` to a fresh staging file and return its path
    async fn stage(&self, key: &str, value: &[u8]) -> Result<PathBuf> {
        let staged = self
            .root
            .join(STAGING_DIR)
            .join(Uuid::new_v4().to_string());
        fs::write(&staged, value)
            .await
            .map_err(|e| Error::io(key, e))?;
        Ok(staged)
    }

    async fn ensure_parent(&self, key: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(key, e))?;
        }
        Ok(())
    }

    async fn get_inner(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(key, e)),
        }
    }

    async fn put_inner(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        self.ensure_parent(key, &path).await?;
        let staged = self.stage(key, &value).await?;
        if let Err(e) = fs::rename(&staged, &path).await {
            let _ = fs::remove_file(&staged).await;
            return Err(Error::io(key, e));
        }
        Ok(())
    }

    async fn put_if_absent_inner(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let path = self.path_for(key)?;
        self.ensure_parent(key, &path).await?;
        let staged = self.stage(key, &value).await?;
        let linked = fs::hard_link(&staged, &path).await;
        let _ = fs::remove_file(&staged).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::io(key, e)),
        }
    }

    async fn list_inner(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending: Vec<(PathBuf, String)> = vec![(self.root.clone(), String::new())];

        while let Some((dir, base)) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| Error::io(prefix, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::io(prefix, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let key = if base.is_empty() {
                    name
                } else {
                    format!("{base}/{name}")
                };
                let file_type = entry.file_type().await.map_err(|e| Error::io(&key, e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete_inner(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(key, e)),
        }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    fn backend(&self) -> &'static str {
        "fs"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let started = Instant::now();
        let result = self.get_inner(key).await;
        observe(self.backend(), "get", started, &result);
        result
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let started = Instant::now();
        let result = self.put_inner(key, value).await;
        observe(self.backend(), "put", started, &result);
        result
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let started = Instant::now();
        let result = self.put_if_absent_inner(key, value).await;
        observe(self.backend(), "put_if_absent", started, &result);
        result
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let started = Instant::now();
        let result = self.list_inner(prefix).await;
        observe(self.backend(), "list", started, &result);
        result
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let started = Instant::now();
        let result = self.delete_inner(key).await;
        observe(self.backend(), "delete", started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        store.put("models/credit/v1", b"payload".to_vec()).await.unwrap();
        assert!(dir.path().join("models").join("credit").join("v1").exists());
        assert_eq!(
            store.get("models/credit/v1").await.unwrap(),
            Some(b"payload".to_vec())
        );
        assert_eq!(store.get("models/credit/v2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_if_absent_keeps_first_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        assert!(store.put_if_absent("cache/k", b"first".to_vec()).await.unwrap());
        assert!(!store.put_if_absent("cache/k", b"second".to_vec()).await.unwrap());
        assert_eq!(store.get("cache/k").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_list_skips_staging_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        store.put("runs/2", vec![]).await.unwrap();
        store.put("runs/1", vec![]).await.unwrap();
        store.put("alerts/a", vec![]).await.unwrap();
        assert_eq!(store.list("runs/").await.unwrap(), vec!["runs/1", "runs/2"]);
        assert_eq!(store.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        store.put("x", vec![1]).await.unwrap();
        assert!(store.delete("x").await.unwrap());
        assert!(!store.delete("x").await.unwrap());
    }
}
