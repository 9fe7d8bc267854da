//! Backup Custom Resource Definition

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{ParseExpressionError, Selector};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Backup resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ark.heptio.com",
    version = "v1",
    kind = "Backup",
    plural = "backups",
    singular = "backup",
    namespaced,
    status = "BackupStatus",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Expires", "type": "string", "jsonPath": ".status.expiration"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Namespaces to include (empty or `*` = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,

    /// Namespaces to exclude
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_namespaces: Vec<String>,

    /// Resources to include, as `resource` or `resource.group` (empty or `*` = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resources: Vec<String>,

    /// Resources to exclude
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resources: Vec<String>,

    /// Only back up items carrying these labels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    /// Snapshot persistent volumes: true, false, or unset (auto)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_volumes: Option<bool>,

    /// Retention window in seconds; 0 means the backup never expires
    #[serde(default)]
    pub ttl_seconds: u64,

    /// Per-resource hooks
    #[serde(default, skip_serializing_if = "BackupHooks::is_empty")]
    pub hooks: BackupHooks,
}

/// Parse an optional label selector, `None` when it selects everything
///
/// Both `matchLabels` and `matchExpressions` are honoured.
pub fn parse_label_selector(selector: Option<&LabelSelector>) -> Result<Option<Selector>, ParseExpressionError> {
    let Some(selector) = selector else {
        return Ok(None);
    };
    let parsed = Selector::try_from(selector.clone())?;
    Ok((!parsed.selects_all()).then_some(parsed))
}

/// Hooks run around individual items during a backup
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupHooks {
    #[serde(default)]
    pub resources: Vec<BackupResourceHookSpec>,
}

impl BackupHooks {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Hooks applying to a filtered set of pods
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupResourceHookSpec {
    pub name: String,

    #[serde(default)]
    pub included_namespaces: Vec<String>,

    #[serde(default)]
    pub excluded_namespaces: Vec<String>,

    #[serde(default)]
    pub included_resources: Vec<String>,

    #[serde(default)]
    pub excluded_resources: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    #[serde(default)]
    pub hooks: Vec<ExecHook>,
}

/// A command executed inside a container
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecHook {
    #[serde(default)]
    pub container: String,

    pub command: Vec<String>,

    /// `Continue` or `Fail`
    #[serde(default)]
    pub on_error: String,

    #[serde(default)]
    pub timeout_seconds: u64,
}

/// Lifecycle phase of a Backup
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum BackupPhase {
    #[default]
    #[serde(alias = "")]
    New,
    FailedValidation,
    InProgress,
    Completed,
    Failed,
    Deleting,
}

impl BackupPhase {
    pub fn is_new(&self) -> bool {
        *self == BackupPhase::New
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupPhase::New => "New",
            BackupPhase::FailedValidation => "FailedValidation",
            BackupPhase::InProgress => "InProgress",
            BackupPhase::Completed => "Completed",
            BackupPhase::Failed => "Failed",
            BackupPhase::Deleting => "Deleting",
        }
    }
}

/// Backup status
///
/// Every field is omitted when unset so that a merge patch computed between two
/// statuses carries only the fields that actually changed.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    #[serde(default, skip_serializing_if = "BackupPhase::is_new")]
    pub phase: BackupPhase,

    /// Backup format version
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,

    /// When the backup becomes eligible for garbage collection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,

    /// Persistent volume name -> snapshot taken for it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volume_backups: BTreeMap<String, VolumeBackupInfo>,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// Everything needed to recreate a volume equivalent to the one snapshotted
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeBackupInfo {
    #[serde(rename = "snapshotID")]
    pub snapshot_id: String,

    #[serde(rename = "type")]
    pub volume_type: String,

    #[serde(default)]
    pub availability_zone: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,
}

impl Backup {
    /// Current phase, treating a missing status as New
    pub fn phase(&self) -> BackupPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut BackupStatus {
        self.status.get_or_insert_with(BackupStatus::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::SelectorExt;

    #[test]
    fn empty_phase_deserializes_as_new() {
        let status: BackupStatus = serde_json::from_str(r#"{"phase": ""}"#).unwrap();
        assert_eq!(status.phase, BackupPhase::New);

        let status: BackupStatus = serde_json::from_str("{}").unwrap();
        assert!(status.phase.is_new());
    }

    #[test]
    fn default_status_serializes_to_empty_object() {
        let value = serde_json::to_value(BackupStatus::default()).unwrap();
        assert_eq!(value, serde_json::json!({}));
    }

    #[test]
    fn volume_backup_info_uses_wire_names() {
        let info = VolumeBackupInfo {
            snapshot_id: "snap-1".into(),
            volume_type: "gp2".into(),
            availability_zone: "us-east-1a".into(),
            iops: Some(100),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["snapshotID"], "snap-1");
        assert_eq!(value["type"], "gp2");
        assert_eq!(value["availabilityZone"], "us-east-1a");
    }

    #[test]
    fn label_selector_honours_expressions() {
        let spec: BackupSpec = serde_json::from_value(serde_json::json!({
            "labelSelector": {
                "matchLabels": {"tier": "front"},
                "matchExpressions": [
                    {"key": "app", "operator": "In", "values": ["web"]},
                    {"key": "env", "operator": "NotIn", "values": ["dev"]}
                ]
            }
        }))
        .unwrap();
        let selector = parse_label_selector(spec.label_selector.as_ref()).unwrap().unwrap();

        let labels = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };
        assert!(selector.matches(&labels(&[("app", "web"), ("tier", "front")])));
        assert!(selector.matches(&labels(&[("app", "web"), ("tier", "front"), ("env", "prod")])));
        assert!(!selector.matches(&labels(&[("app", "db"), ("tier", "front")])));
        assert!(!selector.matches(&labels(&[("app", "web"), ("tier", "front"), ("env", "dev")])));
        assert!(!selector.matches(&labels(&[("app", "web")])));
    }

    #[test]
    fn empty_or_missing_selectors_select_everything() {
        assert!(parse_label_selector(None).unwrap().is_none());
        assert!(parse_label_selector(Some(&LabelSelector::default())).unwrap().is_none());
    }

    #[test]
    fn unknown_operators_are_rejected() {
        let selector: LabelSelector = serde_json::from_value(serde_json::json!({
            "matchExpressions": [{"key": "app", "operator": "Like", "values": ["web"]}]
        }))
        .unwrap();
        assert!(parse_label_selector(Some(&selector)).is_err());
    }
}
