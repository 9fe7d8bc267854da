//! Restore Custom Resource Definition

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::LabelSelector;

/// Restore resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ark.heptio.com",
    version = "v1",
    kind = "Restore",
    plural = "restores",
    singular = "restore",
    namespaced,
    status = "RestoreStatus",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name": "Backup", "type": "string", "jsonPath": ".spec.backupName"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Warnings", "type": "integer", "jsonPath": ".status.warnings"}"#,
    printcolumn = r#"{"name": "Errors", "type": "integer", "jsonPath": ".status.errors"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Name of the backup to restore from
    #[serde(default)]
    pub backup_name: String,

    /// Namespaces to include (empty or `*` = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,

    /// Namespaces to exclude
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_namespaces: Vec<String>,

    /// Resources to include (empty or `*` = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resources: Vec<String>,

    /// Resources to exclude; the non-restorable set is always added
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resources: Vec<String>,

    /// Source namespace -> target namespace
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_mapping: BTreeMap<String, String>,

    /// Only restore items carrying these labels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    /// Recreate persistent volumes from snapshots: true, false, or unset (auto)
    #[serde(rename = "restorePVs", skip_serializing_if = "Option::is_none")]
    pub restore_pvs: Option<bool>,
}

/// Lifecycle phase of a Restore
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum RestorePhase {
    #[default]
    #[serde(alias = "")]
    New,
    FailedValidation,
    InProgress,
    Completed,
}

impl RestorePhase {
    pub fn is_new(&self) -> bool {
        *self == RestorePhase::New
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RestorePhase::New => "New",
            RestorePhase::FailedValidation => "FailedValidation",
            RestorePhase::InProgress => "InProgress",
            RestorePhase::Completed => "Completed",
        }
    }
}

/// Restore status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStatus {
    #[serde(default, skip_serializing_if = "RestorePhase::is_new")]
    pub phase: RestorePhase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,

    /// Total warnings across all buckets
    #[serde(default, skip_serializing_if = "is_zero")]
    pub warnings: u32,

    /// Total errors across all buckets
    #[serde(default, skip_serializing_if = "is_zero")]
    pub errors: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl Restore {
    /// Current phase, treating a missing status as New
    pub fn phase(&self) -> RestorePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut RestoreStatus {
        self.status.get_or_insert_with(RestoreStatus::default)
    }
}

/// Messages collected during one restore, partitioned by scope
///
/// Used for both the warnings and the errors of a run. Messages are only ever
/// appended.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    /// System-level messages (download, upload, plugin failures)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ark: Vec<String>,

    /// Messages about cluster-scoped items
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster: Vec<String>,

    /// Messages about namespaced items, keyed by namespace
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespaces: BTreeMap<String, Vec<String>>,
}

impl RestoreResult {
    /// Record a message for an item; `None` namespace means cluster-scoped
    pub fn add(&mut self, namespace: Option<&str>, msg: impl Into<String>) {
        match namespace {
            Some(ns) if !ns.is_empty() => self
                .namespaces
                .entry(ns.to_string())
                .or_default()
                .push(msg.into()),
            _ => self.cluster.push(msg.into()),
        }
    }

    /// Record a system-level message
    pub fn add_ark(&mut self, msg: impl Into<String>) {
        self.ark.push(msg.into());
    }

    /// Append everything from another result
    pub fn merge(&mut self, other: RestoreResult) {
        self.ark.extend(other.ark);
        self.cluster.extend(other.cluster);
        for (ns, msgs) in other.namespaces {
            self.namespaces.entry(ns).or_default().extend(msgs);
        }
    }

    /// Total message count across all buckets
    pub fn count(&self) -> usize {
        self.ark.len() + self.cluster.len() + self.namespaces.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}
