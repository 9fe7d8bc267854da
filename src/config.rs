//! Operator settings
//!
//! Process-level settings come from the environment; server-wide settings
//! come from the `Config` resource in the operator namespace.

use std::path::PathBuf;
use std::time::Duration;

use kube::{Api, Client};
use tracing::info;

use crate::crd::{Config, ConfigSpec};
use crate::error::{Error, Result};

/// Namespace the server runs in and keeps its Backups, Restores and Config
pub const DEFAULT_NAMESPACE: &str = "heptio-ark";

/// Name of the Config object read at startup
pub const DEFAULT_CONFIG_NAME: &str = "default";

/// Default metrics/health port
pub const DEFAULT_METRICS_PORT: u16 = 8085;

/// Default root directory for the `local` object store
pub const DEFAULT_LOCAL_STORAGE_ROOT: &str = "/var/lib/ark";

/// Process-level operator settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub namespace: String,
    pub config_name: String,
    /// Workers per queue-driven controller
    pub workers: usize,
    pub metrics_port: u16,
    pub local_storage_root: PathBuf,
    /// Archive deployments with zero replicas
    pub scale_deployments_to_zero: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            config_name: DEFAULT_CONFIG_NAME.to_string(),
            workers: 1,
            metrics_port: DEFAULT_METRICS_PORT,
            local_storage_root: PathBuf::from(DEFAULT_LOCAL_STORAGE_ROOT),
            scale_deployments_to_zero: false,
        }
    }
}

impl OperatorConfig {
    /// Read settings from `ARK_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(namespace) = lookup("ARK_NAMESPACE").filter(|v| !v.is_empty()) {
            config.namespace = namespace;
        }
        if let Some(name) = lookup("ARK_CONFIG_NAME").filter(|v| !v.is_empty()) {
            config.config_name = name;
        }
        if let Some(workers) = lookup("ARK_WORKERS") {
            config.workers = workers
                .parse()
                .map_err(|e| Error::config(format!("Invalid ARK_WORKERS '{}': {}", workers, e)))?;
            if config.workers == 0 {
                return Err(Error::config("ARK_WORKERS must be at least 1"));
            }
        }
        if let Some(port) = lookup("ARK_METRICS_PORT") {
            config.metrics_port = port
                .parse()
                .map_err(|e| Error::config(format!("Invalid ARK_METRICS_PORT '{}': {}", port, e)))?;
        }
        if let Some(root) = lookup("ARK_LOCAL_STORAGE_ROOT").filter(|v| !v.is_empty()) {
            config.local_storage_root = PathBuf::from(root);
        }
        if let Some(flag) = lookup("ARK_SCALE_DEPLOYMENTS_TO_ZERO").filter(|v| !v.is_empty()) {
            config.scale_deployments_to_zero = flag.parse().map_err(|e| {
                Error::config(format!("Invalid ARK_SCALE_DEPLOYMENTS_TO_ZERO '{}': {}", flag, e))
            })?;
        }

        Ok(config)
    }
}

/// Fetch the server Config resource
pub async fn load_server_config(client: &Client, namespace: &str, name: &str) -> Result<ConfigSpec> {
    let api: Api<Config> = Api::namespaced(client.clone(), namespace);
    let config = api.get(name).await?;

    if config.spec.backup_storage_provider.bucket.is_empty() {
        return Err(Error::config("backupStorageProvider.bucket must be set"));
    }

    info!(
        namespace = %namespace,
        name = %name,
        provider = %config.spec.backup_storage_provider.name,
        bucket = %config.spec.backup_storage_provider.bucket,
        "Loaded server config"
    );
    Ok(config.spec)
}

/// Sync period requested by the Config resource
pub fn backup_sync_period(spec: &ConfigSpec) -> Duration {
    Duration::from_secs(spec.backup_sync_period_seconds)
}
