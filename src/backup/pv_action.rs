//! Backs up the PersistentVolume bound to each claim

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::crd::Backup;
use crate::error::Result;
use crate::plugin::{ItemAction, ItemActionOutput, ResourceIdentifier, ResourceSelector};

/// Adds a claim's bound PersistentVolume as an additional item
#[derive(Clone, Copy, Debug, Default)]
pub struct BackupPVAction;

impl BackupPVAction {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ItemAction<Backup> for BackupPVAction {
    fn applies_to(&self) -> Result<ResourceSelector> {
        Ok(ResourceSelector {
            included_resources: vec!["persistentvolumeclaims".to_string()],
            ..Default::default()
        })
    }

    async fn execute(&self, item: Value, _backup: &Backup) -> Result<ItemActionOutput> {
        let volume_name = item
            .pointer("/spec/volumeName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if volume_name.is_empty() {
            return Ok(ItemActionOutput::unchanged(item));
        }

        debug!(volume = %volume_name, "Adding bound PersistentVolume to backup");
        Ok(ItemActionOutput {
            item,
            additional_items: vec![ResourceIdentifier {
                group_resource: "persistentvolumes".to_string(),
                namespace: None,
                name: volume_name,
            }],
            warning: None,
        })
    }
}
