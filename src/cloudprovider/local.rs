//! Filesystem-backed object store
//!
//! Buckets are directories under a root; keys are relative paths inside them.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::ObjectStore;
use crate::error::{Error, Result};

/// Provider name the local store registers under
pub const LOCAL_PROVIDER: &str = "local";

/// Object store keeping objects as files
#[derive(Clone, Debug)]
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

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_relative(bucket)?))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        Ok(self.bucket_path(bucket)?.join(checked_relative(key)?))
    }
}

/// Reject empty, absolute or parent-escaping names
fn checked_relative(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    let valid = !name.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(Error::storage(format!("invalid object name '{}'", name)))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(bucket = %bucket, key = %key, bytes = body.len(), "Writing object");
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::storage(format!(
                "object {}/{} not found",
                bucket, key
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_common_prefixes(&self, bucket: &str, delimiter: &str) -> Result<Vec<String>> {
        let path = self.bucket_path(bucket)?;
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut prefixes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                prefixes.push(format!("{}{}", entry.file_name().to_string_lossy(), delimiter));
            }
        }
        prefixes.sort();
        Ok(prefixes)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn objects_round_trip_and_list_as_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store.put_object("ark", "b1/ark-backup.json", b"{}".to_vec()).await.unwrap();
        store.put_object("ark", "b2/b2.json.gz", b"data".to_vec()).await.unwrap();

        assert_eq!(store.get_object("ark", "b1/ark-backup.json").await.unwrap(), b"{}");
        assert_eq!(
            store.list_common_prefixes("ark", "/").await.unwrap(),
            vec!["b1/".to_string(), "b2/".to_string()]
        );

        store.delete_object("ark", "b1/ark-backup.json").await.unwrap();
        assert!(store.get_object("ark", "b1/ark-backup.json").await.is_err());
        store.delete_object("ark", "b1/ark-backup.json").await.unwrap();
    }

    #[tokio::test]
    async fn missing_bucket_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(store.list_common_prefixes("nope", "/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(store.put_object("ark", "../escape", Vec::new()).await.is_err());
        assert!(store.put_object("ark", "/abs", Vec::new()).await.is_err());
        assert!(store.get_object("", "key").await.is_err());
    }
}
