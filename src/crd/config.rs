//! Config Custom Resource Definition
//!
//! Server-wide settings read once at startup from the operator namespace.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Config resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ark.heptio.com",
    version = "v1",
    kind = "Config",
    plural = "configs",
    singular = "config",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    /// Cloud where the cluster's persistent volumes live; unset disables snapshots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_provider: Option<CloudProviderConfig>,

    /// Where backups are stored
    pub backup_storage_provider: ObjectStorageProviderConfig,

    /// How often object storage is synced into the cluster
    #[serde(default = "default_backup_sync_period_seconds")]
    pub backup_sync_period_seconds: u64,

    /// Only restores are processed; the backup controller is not started
    #[serde(default)]
    pub restore_only_mode: bool,
}

fn default_backup_sync_period_seconds() -> u64 {
    3600
}

/// Provider name plus provider-specific settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudProviderConfig {
    pub name: String,

    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Object storage provider and the bucket backups live in
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageProviderConfig {
    pub name: String,

    #[serde(default)]
    pub config: BTreeMap<String, String>,

    pub bucket: String,
}
