//! JSON helpers on top of [`ObjectStore`]

use crate::{Error, ObjectStore, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| Error::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Read and decode a JSON object
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Serialization {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON object
pub async fn put_json<T: Serialize + ?Sized + Sync>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = encode(key, value)?;
    store.put(key, bytes).await
}

/// Encode and write a JSON object unless the key already exists
pub async fn put_json_if_absent<T: Serialize + ?Sized + Sync>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> Result<bool> {
    let bytes = encode(key, value)?;
    store.put_if_absent(key, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_json_roundtrip_and_decode_error() {
        let store = MemoryStore::new();
        let mut value = BTreeMap::new();
        value.insert("auc".to_string(), 0.81);
        put_json(&store, "metrics/run1", &value).await.unwrap();
        let back: Option<BTreeMap<String, f64>> = get_json(&store, "metrics/run1").await.unwrap();
        assert_eq!(back, Some(value));

        store.put("metrics/bad", b"not json".to_vec()).await.unwrap();
        let err = get_json::<BTreeMap<String, f64>>(&store, "metrics/bad")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_put_json_if_absent() {
        let store = MemoryStore::new();
        assert!(put_json_if_absent(&store, "k", &1u32).await.unwrap());
        assert!(!put_json_if_absent(&store, "k", &2u32).await.unwrap());
        assert_eq!(get_json::<u32>(&store, "k").await.unwrap(), Some(1));
    }
}
