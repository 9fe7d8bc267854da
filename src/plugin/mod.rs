//! Pluggable item actions and storage providers
//!
//! Item actions inspect or rewrite individual resources while a backup or
//! restore runs. The [`PluginManager`] hands them out per backup/restore name
//! and must be told when a run is finished with them; [`ActionLease`] does the
//! telling on drop.

mod lease;
mod manager;

pub use lease::*;
pub use manager::*;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::core::{Selector, SelectorExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cloudprovider::{BlockStore, ObjectStore};
use crate::crd::{Backup, Restore};
use crate::error::Result;
use crate::filters::IncludesExcludes;

/// Which items an action wants to see
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceSelector {
    pub included_namespaces: Vec<String>,
    pub excluded_namespaces: Vec<String>,
    pub included_resources: Vec<String>,
    pub excluded_resources: Vec<String>,
    pub label_selector: Option<Selector>,
}

impl ResourceSelector {
    /// Whether an item of `group_resource` is selected
    ///
    /// Namespace lists only constrain namespaced items.
    pub fn matches(&self, group_resource: &str, item: &Value) -> bool {
        let resources = IncludesExcludes::new(
            self.included_resources.iter().cloned(),
            self.excluded_resources.iter().cloned(),
        );
        if !resources.should_include_resource(group_resource) {
            return false;
        }

        if let Some(namespace) = item_namespace(item) {
            let namespaces = IncludesExcludes::new(
                self.included_namespaces.iter().cloned(),
                self.excluded_namespaces.iter().cloned(),
            );
            if !namespaces.should_include(namespace) {
                return false;
            }
        }

        match &self.label_selector {
            Some(selector) => selector.matches(&item_labels(item)),
            None => true,
        }
    }
}

/// Identity of a resource an action asks to have processed as well
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentifier {
    /// `plural` for the core group, `plural.group` otherwise
    pub group_resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

/// What an action did to an item
#[derive(Clone, Debug, PartialEq)]
pub struct ItemActionOutput {
    /// The item to continue with (possibly modified)
    pub item: Value,
    /// Further items to process
    pub additional_items: Vec<ResourceIdentifier>,
    /// Non-fatal problem to report
    pub warning: Option<String>,
}

impl ItemActionOutput {
    pub fn unchanged(item: Value) -> Self {
        Self {
            item,
            additional_items: Vec::new(),
            warning: None,
        }
    }
}

/// An action applied to selected items during a backup (`R = Backup`) or a
/// restore (`R = Restore`)
#[async_trait]
pub trait ItemAction<R: Send + Sync + 'static>: Send + Sync {
    fn applies_to(&self) -> Result<ResourceSelector>;

    async fn execute(&self, item: Value, request: &R) -> Result<ItemActionOutput>;
}

pub type BackupItemAction = dyn ItemAction<Backup>;
pub type RestoreItemAction = dyn ItemAction<Restore>;

/// An action together with the selector it registered
pub struct ResolvedAction<R: Send + Sync + 'static> {
    pub selector: ResourceSelector,
    pub action: Arc<dyn ItemAction<R>>,
}

/// Ask every action for its selector up front
pub fn resolve_actions<R: Send + Sync + 'static>(
    actions: &[Arc<dyn ItemAction<R>>],
) -> Result<Vec<ResolvedAction<R>>> {
    actions
        .iter()
        .map(|action| {
            Ok(ResolvedAction {
                selector: action.applies_to()?,
                action: action.clone(),
            })
        })
        .collect()
}

/// Source of item actions and storage providers
pub trait PluginManager: Send + Sync {
    fn get_backup_item_actions(&self, backup_name: &str) -> Result<Vec<Arc<BackupItemAction>>>;

    /// Release the actions handed out for a backup
    fn close_backup_item_actions(&self, backup_name: &str) -> Result<()>;

    fn get_restore_item_actions(&self, restore_name: &str) -> Result<Vec<Arc<RestoreItemAction>>>;

    /// Release the actions handed out for a restore
    fn close_restore_item_actions(&self, restore_name: &str) -> Result<()>;

    fn get_block_store(&self, provider: &str) -> Result<Arc<dyn BlockStore>>;

    fn get_object_store(&self, provider: &str) -> Result<Arc<dyn ObjectStore>>;
}

pub fn item_name(item: &Value) -> &str {
    item.pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Namespace of an item; `None` for cluster-scoped items
pub fn item_namespace(item: &Value) -> Option<&str> {
    item.pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .filter(|ns| !ns.is_empty())
}

pub fn item_labels(item: &Value) -> BTreeMap<String, String> {
    item.pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(namespace: &str, app: &str) -> Value {
        json!({
            "metadata": {"name": "p", "namespace": namespace, "labels": {"app": app}}
        })
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = ResourceSelector::default();
        assert!(selector.matches("pods", &pod("ns-1", "web")));
        assert!(selector.matches("persistentvolumes", &json!({"metadata": {"name": "pv"}})));
    }

    #[test]
    fn selector_filters_by_resource_namespace_and_labels() {
        let selector = ResourceSelector {
            included_resources: vec!["pods".into()],
            excluded_namespaces: vec!["kube-system".into()],
            label_selector: Some(Selector::from_iter([("app", "web")])),
            ..Default::default()
        };

        assert!(selector.matches("pods", &pod("ns-1", "web")));
        assert!(!selector.matches("deployments.apps", &pod("ns-1", "web")));
        assert!(!selector.matches("pods", &pod("kube-system", "web")));
        assert!(!selector.matches("pods", &pod("ns-1", "db")));
    }

    #[test]
    fn namespace_lists_ignore_cluster_scoped_items() {
        let selector = ResourceSelector {
            included_namespaces: vec!["ns-1".into()],
            ..Default::default()
        };
        assert!(selector.matches("persistentvolumes", &json!({"metadata": {"name": "pv-1"}})));
    }

    #[test]
    fn item_accessors_tolerate_missing_metadata() {
        let item = json!({});
        assert_eq!(item_name(&item), "");
        assert_eq!(item_namespace(&item), None);
        assert!(item_labels(&item).is_empty());
    }
}
