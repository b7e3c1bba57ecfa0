//! Bucket/key object access. Buckets on the local backend are directories
//! under a root and keys are `/`-separated paths inside them.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("bucket `{0}` does not exist")]
    MissingBucket(String),
    #[error("object `{bucket}/{key}` does not exist")]
    MissingObject { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object store io error on `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key in `bucket`, sorted.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>, ObjectStoreError>;
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError>;
}

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, ObjectStoreError> {
        if !is_safe_relative(bucket) || bucket.contains('/') {
            return Err(ObjectStoreError::InvalidKey(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }
}

fn is_safe_relative(key: &str) -> bool {
    !key.is_empty() && Path::new(key).components().all(|part| matches!(part, Component::Normal(_)))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ObjectStoreError + '_ {
    move |source| ObjectStoreError::Io { path: path.to_path_buf(), source }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
        let bucket_root = self.bucket_path(bucket)?;
        if !tokio::fs::try_exists(&bucket_root).await.map_err(io_error(&bucket_root))? {
            return Err(ObjectStoreError::MissingBucket(bucket.to_string()));
        }

        let mut objects = Vec::new();
        let mut pending = vec![bucket_root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_error(&dir))?;
            while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
                let path = entry.path();
                let metadata = entry.metadata().await.map_err(io_error(&path))?;
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&bucket_root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let modified = metadata.modified().map_err(io_error(&path))?;
                objects.push(ObjectSummary { key, last_modified: DateTime::<Utc>::from(modified) });
            }
        }

        objects.sort_by(|left, right| left.key.cmp(&right.key));
        Ok(objects)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        if !is_safe_relative(key) {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        let path = self.bucket_path(bucket)?.join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::MissingObject {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(source) => Err(ObjectStoreError::Io { path, source }),
        }
    }
}

type Bucket = BTreeMap<String, (Vec<u8>, DateTime<Utc>)>;

#[derive(Default)]
pub struct InMemoryObjectStore {
    buckets: RwLock<BTreeMap<String, Bucket>>,
}

impl InMemoryObjectStore {
    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<Vec<u8>>,
        last_modified: DateTime<Utc>,
    ) {
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), (body.into(), last_modified));
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::MissingBucket(bucket.to_string()))?;
        Ok(objects
            .iter()
            .map(|(key, (_, last_modified))| ObjectSummary {
                key: key.clone(),
                last_modified: *last_modified,
            })
            .collect())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|(body, _)| body.clone())
            .ok_or_else(|| ObjectStoreError::MissingObject {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use super::{InMemoryObjectStore, LocalObjectStore, ObjectStore, ObjectStoreError};

    #[tokio::test]
    async fn local_store_lists_nested_keys_with_forward_slashes() {
        let dir = TempDir::new().expect("tempdir");
        let run = dir.path().join("ecomm-order-items").join("2016-05-01");
        fs::create_dir_all(&run).expect("mkdir");
        fs::write(run.join("part-00000"), "line").expect("write part");
        fs::write(run.join("_SUCCESS"), "").expect("write sentinel");

        let store = LocalObjectStore::new(dir.path());
        let keys: Vec<String> = store
            .list_objects("ecomm-order-items")
            .await
            .expect("list")
            .into_iter()
            .map(|object| object.key)
            .collect();

        assert_eq!(keys, vec!["2016-05-01/_SUCCESS", "2016-05-01/part-00000"]);
        let body = store.get_object("ecomm-order-items", "2016-05-01/part-00000").await;
        assert_eq!(body.expect("get"), b"line".to_vec());
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_keys() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join("bucket")).expect("mkdir");
        let store = LocalObjectStore::new(dir.path());

        assert!(matches!(
            store.get_object("bucket", "../secret").await,
            Err(ObjectStoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.list_objects("missing").await,
            Err(ObjectStoreError::MissingBucket(_))
        ));
    }

    #[tokio::test]
    async fn in_memory_store_reports_missing_objects() {
        let store = InMemoryObjectStore::default();
        let stamp = Utc.with_ymd_and_hms(2016, 5, 1, 0, 0, 0).single().expect("timestamp");
        store.put("bucket", "run/part-00000", "x", stamp).await;

        assert_eq!(store.list_objects("bucket").await.expect("list")[0].last_modified, stamp);
        assert!(matches!(
            store.get_object("bucket", "run/part-00001").await,
            Err(ObjectStoreError::MissingObject { .. })
        ));
    }
}
