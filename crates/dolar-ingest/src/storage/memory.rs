//! In-memory [`ObjectStore`] used by tests and dry runs.

use super::{calculate_sha256, ObjectStore, StorageError, StorageResult, UploadResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<(String, String), StoredObject>,
    failing_buckets: HashSet<String>,
}

/// Cloning shares the underlying objects, so a test can keep a handle while
/// the stage under test owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds an object directly, bypassing failure injection.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.lock().objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.into(),
                content_type: None,
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every subsequent put or get against `bucket` fails.
    pub fn fail_bucket(&self, bucket: &str) {
        self.lock().failing_buckets.insert(bucket.to_string());
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> StorageResult<UploadResult> {
        let mut inner = self.lock();
        if inner.failing_buckets.contains(bucket) {
            return Err(StorageError::upload(bucket, key, "injected failure"));
        }

        let result = UploadResult {
            bucket: bucket.to_string(),
            key: key.to_string(),
            checksum: calculate_sha256(&data),
            size: data.len(),
        };
        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(result)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let inner = self.lock();
        if inner.failing_buckets.contains(bucket) {
            return Err(StorageError::download(bucket, key, "injected failure"));
        }

        inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.data.clone())
            .ok_or_else(|| StorageError::not_found(bucket, key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = InMemoryStore::new();
        let result = store
            .put_object("bucket", "a.json", b"{}".to_vec(), Some("application/json"))
            .await
            .unwrap();

        assert_eq!(result.size, 2);
        assert_eq!(store.get_object("bucket", "a.json").await.unwrap(), b"{}");
        assert_eq!(
            store.object("bucket", "a.json").unwrap().content_type.as_deref(),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = InMemoryStore::new();
        let err = store.get_object("bucket", "nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_clones_share_objects() {
        let store = InMemoryStore::new();
        let handle = store.clone();
        store.insert("bucket", "k", "v");

        assert_eq!(handle.keys("bucket"), vec!["k".to_string()]);
        assert!(handle.keys("other").is_empty());
    }

    #[tokio::test]
    async fn test_failing_bucket() {
        let store = InMemoryStore::new();
        store.fail_bucket("broken");

        assert!(store.put_object("broken", "k", vec![], None).await.is_err());
        assert!(store.is_empty());
        assert!(store.put_object("fine", "k", vec![], None).await.is_ok());
    }
}
