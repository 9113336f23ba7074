//! Object-store capability and prefix-level helpers built on it.

pub mod memory;
pub mod s3;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::error::Result;

/// Parallel copies issued by [`copy_prefix`].
pub const COPY_CONCURRENCY: usize = 10;

/// Minimal object-store surface used by the orchestrator and the sync bridge.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` at `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// Delete one object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete several objects in as few requests as the backend allows.
    async fn delete_many(&self, keys: &[String]) -> Result<()>;

    /// Every key starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Server-side copy from `from` to `to`.
    async fn copy(&self, from: &str, to: &str) -> Result<()>;
}

/// Delete every object under `prefix`. Returns how many were removed.
pub async fn delete_prefix(store: &dyn ObjectStore, prefix: &str) -> Result<usize> {
    let keys = store.list(prefix).await?;
    if keys.is_empty() {
        debug!(prefix = %prefix, "Nothing to delete under prefix");
        return Ok(0);
    }
    store.delete_many(&keys).await?;
    info!(prefix = %prefix, count = keys.len(), "🗑️ Deleted objects under prefix");
    Ok(keys.len())
}

/// Copy every object under `from_prefix` to the same relative key under `to_prefix`.
pub async fn copy_prefix(store: &dyn ObjectStore, from_prefix: &str, to_prefix: &str) -> Result<usize> {
    let keys = store.list(from_prefix).await?;
    let pairs: Vec<(String, String)> = keys
        .iter()
        .filter_map(|key| {
            key.strip_prefix(from_prefix)
                .map(|rest| (key.clone(), format!("{to_prefix}{rest}")))
        })
        .collect();

    let copies: Vec<_> = pairs.iter().map(|(from, to)| store.copy(from, to)).collect();
    stream::iter(copies)
        .buffer_unordered(COPY_CONCURRENCY)
        .try_collect::<Vec<()>>()
        .await?;

    info!(from = %from_prefix, to = %to_prefix, count = pairs.len(), "📦 Copied objects between prefixes");
    Ok(pairs.len())
}

/// Move a file or a directory from `from` to `to`.
///
/// The object at exactly `from` and everything under `from/` are copied to the
/// matching keys under `to`, then the originals are deleted.
pub async fn move_path(store: &dyn ObjectStore, from: &str, to: &str) -> Result<usize> {
    let from = from.trim_end_matches('/');
    let to = to.trim_end_matches('/');
    let dir_prefix = format!("{from}/");

    let sources: Vec<String> = store
        .list(from)
        .await?
        .into_iter()
        .filter(|key| key == from || key.starts_with(&dir_prefix))
        .collect();

    if sources.is_empty() {
        debug!(from = %from, "Nothing to move");
        return Ok(0);
    }

    for source in &sources {
        let target = format!("{to}{}", &source[from.len()..]);
        store.copy(source, &target).await?;
    }
    store.delete_many(&sources).await?;

    info!(from = %from, to = %to, count = sources.len(), "Moved objects");
    Ok(sources.len())
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryObjectStore;
    use super::*;

    async fn seeded() -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        for key in [
            "boilerplate/node/package.json",
            "boilerplate/node/src/index.js",
            "boilerplate/go/main.go",
            "code/node/lab1/app.js",
            "code/node/lab1/app.js.bak",
            "code/node/lab1/lib/",
            "code/node/lab1/lib/util.js",
        ] {
            store.put(key, key.as_bytes().to_vec()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_copy_prefix_preserves_relative_keys() {
        let store = seeded().await;
        let copied = copy_prefix(&store, "boilerplate/node/", "code/node/lab2/")
            .await
            .unwrap();

        assert_eq!(copied, 2);
        assert_eq!(
            store.list("code/node/lab2/").await.unwrap(),
            vec![
                "code/node/lab2/package.json".to_string(),
                "code/node/lab2/src/index.js".to_string(),
            ]
        );
        assert_eq!(store.list("boilerplate/node/").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_move_file_leaves_sibling_with_shared_prefix() {
        let store = seeded().await;
        let moved = move_path(&store, "code/node/lab1/app.js", "code/node/lab1/main.js")
            .await
            .unwrap();

        assert_eq!(moved, 1);
        assert!(store.contains("code/node/lab1/main.js"));
        assert!(!store.contains("code/node/lab1/app.js"));
        assert!(store.contains("code/node/lab1/app.js.bak"));
    }

    #[tokio::test]
    async fn test_move_directory_carries_marker_and_children() {
        let store = seeded().await;
        let moved = move_path(&store, "code/node/lab1/lib", "code/node/lab1/shared")
            .await
            .unwrap();

        assert_eq!(moved, 2);
        assert!(store.contains("code/node/lab1/shared/"));
        assert!(store.contains("code/node/lab1/shared/util.js"));
        assert!(store.list("code/node/lab1/lib").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_prefix_on_empty_prefix_is_a_noop() {
        let store = seeded().await;
        assert_eq!(delete_prefix(&store, "code/rust/").await.unwrap(), 0);
        assert_eq!(delete_prefix(&store, "code/node/lab1/").await.unwrap(), 4);
        assert!(store.list("code/node/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_prefix_stops_on_first_failure() {
        let mut mock = MockObjectStore::new();
        mock.expect_list()
            .returning(|_| Ok(vec!["boilerplate/go/main.go".to_string()]));
        mock.expect_copy().times(1).returning(|from, _| {
            Err(crate::ObjectStoreError::request("copy", from, "access denied"))
        });

        let err = copy_prefix(&mock, "boilerplate/go/", "code/go/lab9/")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access denied"));
    }
}
