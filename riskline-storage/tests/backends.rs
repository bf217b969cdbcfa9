//! Behaviour shared by every ObjectStore backend

use riskline_storage::{FsStore, MemoryStore, ObjectStore};
use std::sync::Arc;

async fn exercise(store: Arc<dyn ObjectStore>) {
    assert_eq!(store.get("a/b").await.unwrap(), None);
    store.put("a/b", b"1".to_vec()).await.unwrap();
    store.put("a/b", b"2".to_vec()).await.unwrap();
    assert_eq!(store.get("a/b").await.unwrap(), Some(b"2".to_vec()));

    store.put("a/c", vec![]).await.unwrap();
    store.put("z", vec![]).await.unwrap();
    assert_eq!(store.list("a/").await.unwrap(), vec!["a/b", "a/c"]);

    assert!(store.delete("a/b").await.unwrap());
    assert_eq!(store.list("a/").await.unwrap(), vec!["a/c"]);

    assert!(store.get("../etc/passwd").await.is_err());
}

async fn race(store: Arc<dyn ObjectStore>) {
    let mut handles = Vec::new();
    for i in 0..16u8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.put_if_absent("cache/contended", vec![i]).await.unwrap()
        }));
    }

    let mut winners = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        if handle.await.unwrap() {
            winners.push(i as u8);
        }
    }
    assert_eq!(winners.len(), 1, "exactly one writer must win");
    assert_eq!(
        store.get("cache/contended").await.unwrap(),
        Some(vec![winners[0]])
    );
}

#[tokio::test]
async fn test_memory_backend_contract() {
    exercise(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_fs_backend_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise(Arc::new(FsStore::open(dir.path()).await.unwrap())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_put_if_absent_race() {
    race(Arc::new(MemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fs_put_if_absent_race() {
    let dir = tempfile::tempdir().unwrap();
    race(Arc::new(FsStore::open(dir.path()).await.unwrap())).await;
}
