//! Reconciliation logic for Ark resources
//!
//! This module contains the business logic for processing backups and
//! restores and for syncing backups from object storage. Everything here
//! talks to the cluster through the seams in [`crate::client`], so it runs
//! unchanged against fakes.

pub mod backup;
pub mod backup_sync;
pub mod restore;

pub use backup::BackupReconciler;
pub use backup_sync::{BackupSyncReconciler, SyncSummary};
pub use restore::RestoreReconciler;

use crate::client::{BackupClient, RestoreClient};
use crate::crd::{Backup, Restore};
use crate::error::{Error, Result};
use crate::patch::merge_patch_between;

/// Split a `namespace/name` queue key
///
/// A key without a slash names a cluster-scoped object.
pub fn split_key(key: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok((String::new(), name.to_string())),
        [namespace, name] if !name.is_empty() => Ok((namespace.to_string(), name.to_string())),
        _ => Err(Error::InvalidKey(key.to_string())),
    }
}

/// Send the changes between `original` and `updated` as one merge patch
pub async fn patch_backup(client: &dyn BackupClient, original: &Backup, updated: &Backup) -> Result<Backup> {
    match merge_patch_between(original, updated)? {
        Some(patch) => client.patch(original, &patch).await,
        None => Ok(updated.clone()),
    }
}

/// Send the changes between `original` and `updated` as one merge patch
pub async fn patch_restore(
    client: &dyn RestoreClient,
    original: &Restore,
    updated: &Restore,
) -> Result<Restore> {
    match merge_patch_between(original, updated)? {
        Some(patch) => client.patch(original, &patch).await,
        None => Ok(updated.clone()),
    }
}
