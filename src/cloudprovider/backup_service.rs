//! Backup artifacts in object storage
//!
//! Every backup owns a directory in the bucket:
//!
//! ```text
//! <backup>/ark-backup.json               Backup object as it finished
//! <backup>/<backup>.json.gz              item archive
//! <backup>/<backup>-logs.txt             backup log
//! <backup>/restore-<restore>-logs.txt    log of each restore from it
//! <backup>/restore-<restore>-results.gz  warnings/errors of each restore
//! ```

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::ObjectStore;
use crate::crd::Backup;
use crate::error::{Error, Result};

/// Name of the metadata object inside each backup directory
pub const METADATA_FILE: &str = "ark-backup.json";

/// Backup-level operations on top of an object store
#[async_trait]
pub trait BackupService: Send + Sync {
    /// Store a finished backup's metadata, item archive and log
    async fn upload_backup(
        &self,
        bucket: &str,
        name: &str,
        metadata: &[u8],
        data: &mut (dyn Read + Send),
        log: &mut (dyn Read + Send),
    ) -> Result<()>;

    /// Fetch a backup's item archive
    async fn download_backup(&self, bucket: &str, name: &str) -> Result<Vec<u8>>;

    /// Fetch a backup's metadata
    async fn get_backup(&self, bucket: &str, name: &str) -> Result<Backup>;

    /// Metadata of every readable backup in the bucket
    async fn get_all_backups(&self, bucket: &str) -> Result<Vec<Backup>>;

    async fn upload_restore_log(
        &self,
        bucket: &str,
        backup_name: &str,
        restore_name: &str,
        log: &mut (dyn Read + Send),
    ) -> Result<()>;

    async fn upload_restore_results(
        &self,
        bucket: &str,
        backup_name: &str,
        restore_name: &str,
        results: &mut (dyn Read + Send),
    ) -> Result<()>;
}

pub fn metadata_key(backup: &str) -> String {
    format!("{}/{}", backup, METADATA_FILE)
}

pub fn data_key(backup: &str) -> String {
    format!("{}/{}.json.gz", backup, backup)
}

pub fn log_key(backup: &str) -> String {
    format!("{}/{}-logs.txt", backup, backup)
}

pub fn restore_log_key(backup: &str, restore: &str) -> String {
    format!("{}/restore-{}-logs.txt", backup, restore)
}

pub fn restore_results_key(backup: &str, restore: &str) -> String {
    format!("{}/restore-{}-results.gz", backup, restore)
}

fn read_all(reader: &mut (dyn Read + Send)) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// [`BackupService`] over any [`ObjectStore`]
#[derive(Clone)]
pub struct ObjectStoreBackupService {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackupService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BackupService for ObjectStoreBackupService {
    async fn upload_backup(
        &self,
        bucket: &str,
        name: &str,
        metadata: &[u8],
        data: &mut (dyn Read + Send),
        log: &mut (dyn Read + Send),
    ) -> Result<()> {
        // The log is uploaded first and is best-effort: a missing log must not
        // hide an otherwise complete backup.
        match read_all(log) {
            Ok(body) => {
                if let Err(e) = self.store.put_object(bucket, &log_key(name), body).await {
                    error!(bucket = %bucket, backup = %name, error = %e, "Error uploading backup log");
                }
            }
            Err(e) => error!(backup = %name, error = %e, "Error reading backup log"),
        }

        self.store
            .put_object(bucket, &metadata_key(name), metadata.to_vec())
            .await?;

        let data_result = match read_all(data) {
            Ok(body) => self.store.put_object(bucket, &data_key(name), body).await,
            Err(e) => Err(e),
        };

        if let Err(e) = data_result {
            // Metadata without data would be synced as a usable backup.
            if let Err(delete_err) = self.store.delete_object(bucket, &metadata_key(name)).await {
                error!(backup = %name, error = %delete_err, "Error deleting metadata after failed data upload");
            }
            return Err(e);
        }

        debug!(bucket = %bucket, backup = %name, "Uploaded backup");
        Ok(())
    }

    async fn download_backup(&self, bucket: &str, name: &str) -> Result<Vec<u8>> {
        self.store.get_object(bucket, &data_key(name)).await
    }

    async fn get_backup(&self, bucket: &str, name: &str) -> Result<Backup> {
        let body = self.store.get_object(bucket, &metadata_key(name)).await?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::storage(format!("error decoding metadata of backup {}: {}", name, e))
        })
    }

    async fn get_all_backups(&self, bucket: &str) -> Result<Vec<Backup>> {
        let prefixes = self.store.list_common_prefixes(bucket, "/").await?;

        let mut backups = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            let name = prefix.trim_end_matches('/');
            match self.get_backup(bucket, name).await {
                Ok(backup) => backups.push(backup),
                Err(e) => warn!(bucket = %bucket, backup = %name, error = %e, "Skipping unreadable backup"),
            }
        }
        Ok(backups)
    }

    async fn upload_restore_log(
        &self,
        bucket: &str,
        backup_name: &str,
        restore_name: &str,
        log: &mut (dyn Read + Send),
    ) -> Result<()> {
        let body = read_all(log)?;
        self.store
            .put_object(bucket, &restore_log_key(backup_name, restore_name), body)
            .await
    }

    async fn upload_restore_results(
        &self,
        bucket: &str,
        backup_name: &str,
        restore_name: &str,
        results: &mut (dyn Read + Send),
    ) -> Result<()> {
        let body = read_all(results)?;
        self.store
            .put_object(bucket, &restore_results_key(backup_name, restore_name), body)
            .await
    }
}
