//! Custom Resource Definitions for the Ark operator

mod backup;
mod config;
mod restore;

pub use backup::*;
pub use config::*;
pub use restore::*;

use kube::CustomResourceExt;

/// Resources that are never restored, whatever the request says
pub const NON_RESTORABLE_RESOURCES: &[&str] = &[
    "nodes",
    "events",
    "events.events.k8s.io",
    // backups are synced in from object storage instead
    "backups.ark.heptio.com",
    // restores only mean something in the cluster that ran them
    "restores.ark.heptio.com",
];

/// Generate all CRD YAML manifests
pub fn generate_crds() -> serde_yaml::Result<Vec<String>> {
    Ok(vec![
        serde_yaml::to_string(&Backup::crd())?,
        serde_yaml::to_string(&Restore::crd())?,
        serde_yaml::to_string(&Config::crd())?,
    ])
}
