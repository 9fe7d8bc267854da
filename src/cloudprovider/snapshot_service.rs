//! Volume snapshot operations with readiness polling

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{interval_at, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::BlockStore;
use crate::error::{Error, Result};

/// How long a restored volume may take to become ready
pub const VOLUME_CREATE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often readiness is checked while waiting
pub const VOLUME_CREATE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshot and restore of block volumes
#[async_trait]
pub trait SnapshotService: Send + Sync {
    /// Snapshot a volume and tag the snapshot; returns the snapshot ID
    async fn create_snapshot(
        &self,
        volume_id: &str,
        volume_az: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<String>;

    /// Create a volume from a snapshot and wait until it is ready to use
    async fn create_volume_from_snapshot(
        &self,
        snapshot_id: &str,
        volume_type: &str,
        volume_az: &str,
        iops: Option<i64>,
    ) -> Result<String>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;

    async fn get_volume_info(&self, volume_id: &str, volume_az: &str) -> Result<(String, Option<i64>)>;

    fn get_volume_id(&self, pv: &Value) -> Result<String>;

    fn set_volume_id(&self, pv: Value, volume_id: &str) -> Result<Value>;
}

/// [`SnapshotService`] over a provider [`BlockStore`]
#[derive(Clone)]
pub struct BlockStoreSnapshotService {
    block_store: Arc<dyn BlockStore>,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl BlockStoreSnapshotService {
    pub fn new(block_store: Arc<dyn BlockStore>) -> Self {
        Self {
            block_store,
            poll_interval: VOLUME_CREATE_POLL_INTERVAL,
            wait_timeout: VOLUME_CREATE_WAIT_TIMEOUT,
        }
    }

    /// Poll `is_volume_ready` until it reports ready or the timeout passes
    ///
    /// Poll errors count as "not ready yet". A poll still running at the
    /// deadline is abandoned.
    async fn wait_until_ready(&self, volume_id: &str, volume_az: &str) -> Result<()> {
        let deadline = Instant::now() + self.wait_timeout;
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                _ = ticker.tick() => {
                    let poll = self.block_store.is_volume_ready(volume_id, volume_az);
                    match timeout_at(deadline, poll).await {
                        Ok(Ok(true)) => return Ok(()),
                        Ok(Ok(false)) => debug!(volume_id = %volume_id, "Volume not ready yet"),
                        Ok(Err(e)) => warn!(volume_id = %volume_id, error = %e, "Error checking volume readiness"),
                        Err(_) => break,
                    }
                }
            }
        }
        Err(Error::VolumeNotReady { volume_id: volume_id.to_string() })
    }
}

#[async_trait]
impl SnapshotService for BlockStoreSnapshotService {
    async fn create_snapshot(
        &self,
        volume_id: &str,
        volume_az: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<String> {
        self.block_store.create_snapshot(volume_id, volume_az, tags).await
    }

    async fn create_volume_from_snapshot(
        &self,
        snapshot_id: &str,
        volume_type: &str,
        volume_az: &str,
        iops: Option<i64>,
    ) -> Result<String> {
        let volume_id = self
            .block_store
            .create_volume_from_snapshot(snapshot_id, volume_type, volume_az, iops)
            .await?;

        self.wait_until_ready(&volume_id, volume_az).await?;
        Ok(volume_id)
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.block_store.delete_snapshot(snapshot_id).await
    }

    async fn get_volume_info(&self, volume_id: &str, volume_az: &str) -> Result<(String, Option<i64>)> {
        self.block_store.get_volume_info(volume_id, volume_az).await
    }

    fn get_volume_id(&self, pv: &Value) -> Result<String> {
        self.block_store.get_volume_id(pv)
    }

    fn set_volume_id(&self, pv: Value, volume_id: &str) -> Result<Value> {
        self.block_store.set_volume_id(pv, volume_id)
    }
}
