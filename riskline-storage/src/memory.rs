//! In-memory object store

use crate::key::validate_key;
use crate::metrics::observe;
use crate::{ObjectStore, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Object store backed by a shared ordered map. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let started = Instant::now();
        let result = match validate_key(key) {
            Ok(()) => Ok(self.objects.read().await.get(key).cloned()),
            Err(e) => Err(e),
        };
        observe(self.backend(), "get", started, &result);
        result
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let started = Instant::now();
        let result = match validate_key(key) {
            Ok(()) => {
                self.objects.write().await.insert(key.to_string(), value);
                Ok(())
            }
            Err(e) => Err(e),
        };
        observe(self.backend(), "put", started, &result);
        result
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let started = Instant::now();
        let result = match validate_key(key) {
            Ok(()) => {
                let mut objects = self.objects.write().await;
                if objects.contains_key(key) {
                    Ok(false)
                } else {
                    objects.insert(key.to_string(), value);
                    Ok(true)
                }
            }
            Err(e) => Err(e),
        };
        observe(self.backend(), "put_if_absent", started, &result);
        result
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let started = Instant::now();
        let keys = self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let result = Ok(keys);
        observe(self.backend(), "list", started, &result);
        result
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let started = Instant::now();
        let result = match validate_key(key) {
            Ok(()) => Ok(self.objects.write().await.remove(key).is_some()),
            Err(e) => Err(e),
        };
        observe(self.backend(), "delete", started, &result);
        result
    }
}
