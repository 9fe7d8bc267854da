//! Backup sync reconciler
//!
//! Mirrors the backups found in object storage into the cluster so that a
//! fresh cluster pointed at an existing bucket can restore from it.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, error, info};

use crate::client::BackupClient;
use crate::cloudprovider::BackupService;
use crate::error::Result;
use crate::metrics;

/// Finalizer that older servers put on backups; never recreated by a sync
pub const GC_FINALIZER: &str = "gc.ark.heptio.com";

/// Counts from one sync pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub already_existing: usize,
    pub failed: usize,
}

/// Dependencies of one sync pass
pub struct BackupSyncReconciler {
    pub client: Arc<dyn BackupClient>,
    pub backup_service: Arc<dyn BackupService>,
    pub bucket: String,
    /// Namespace backups are created in
    pub namespace: String,
}

impl BackupSyncReconciler {
    /// Create every backup from object storage that the cluster lacks
    ///
    /// Only a failure to list the bucket fails the pass; per-backup problems
    /// are logged and counted.
    pub async fn sync(&self) -> Result<SyncSummary> {
        info!(bucket = %self.bucket, "Syncing backups from object storage");
        let backups = self.backup_service.get_all_backups(&self.bucket).await?;
        info!(count = backups.len(), "Got backups from object storage");

        let mut summary = SyncSummary::default();
        for mut backup in backups {
            let name = backup.name_any();
            debug!(backup = %name, "Syncing backup");

            if let Some(finalizers) = backup.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != GC_FINALIZER);
                if finalizers.is_empty() {
                    backup.metadata.finalizers = None;
                }
            }
            backup.metadata.namespace = Some(self.namespace.clone());
            backup.metadata.resource_version = None;

            match self.client.create(&self.namespace, &backup).await {
                Ok(_) => {
                    info!(backup = %name, "Created backup from object storage");
                    summary.created += 1;
                    metrics::BACKUP_SYNC_ITEMS.with_label_values(&["created"]).inc();
                }
                Err(e) if e.is_already_exists() => {
                    summary.already_existing += 1;
                    metrics::BACKUP_SYNC_ITEMS.with_label_values(&["exists"]).inc();
                }
                Err(e) => {
                    error!(backup = %name, error = %e, "Error syncing backup from object storage");
                    summary.failed += 1;
                    metrics::BACKUP_SYNC_ITEMS.with_label_values(&["failed"]).inc();
                }
            }
        }

        Ok(summary)
    }
}
