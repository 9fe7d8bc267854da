//! Storage backends
//!
//! [`ObjectStore`] and [`BlockStore`] are the raw provider interfaces;
//! [`BackupService`] and [`SnapshotService`] layer backup semantics on top.

mod backup_service;
mod local;
mod snapshot_service;

pub use backup_service::*;
pub use local::*;
pub use snapshot_service::*;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Bucketed key/value blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Distinct key prefixes up to the first `delimiter`, delimiter included
    async fn list_common_prefixes(&self, bucket: &str, delimiter: &str) -> Result<Vec<String>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Volume and snapshot operations of a cloud provider
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Start creating a volume from a snapshot; returns the new volume ID
    async fn create_volume_from_snapshot(
        &self,
        snapshot_id: &str,
        volume_type: &str,
        volume_az: &str,
        iops: Option<i64>,
    ) -> Result<String>;

    async fn is_volume_ready(&self, volume_id: &str, volume_az: &str) -> Result<bool>;

    /// Volume type and IOPS of an existing volume
    async fn get_volume_info(&self, volume_id: &str, volume_az: &str) -> Result<(String, Option<i64>)>;

    async fn create_snapshot(
        &self,
        volume_id: &str,
        volume_az: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<String>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;

    /// Provider volume ID referenced by a PersistentVolume; empty if the PV is
    /// not backed by this provider
    fn get_volume_id(&self, pv: &Value) -> Result<String>;

    /// Point a PersistentVolume at a different provider volume
    fn set_volume_id(&self, pv: Value, volume_id: &str) -> Result<Value>;
}
