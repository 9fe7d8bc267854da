//! Catalog of listable API resources

use std::collections::BTreeMap;

use kube::{
    api::{Api, DynamicObject},
    discovery::{verbs, ApiCapabilities, ApiResource, Discovery, Scope},
    Client,
};
use tracing::debug;

use crate::error::Result;

/// `plural` for the core group, `plural.group` otherwise
pub fn group_resource(resource: &ApiResource) -> String {
    if resource.group.is_empty() {
        resource.plural.clone()
    } else {
        format!("{}.{}", resource.plural, resource.group)
    }
}

/// A discovered resource type
#[derive(Clone, Debug)]
pub struct CatalogEntry {
    pub resource: ApiResource,
    pub namespaced: bool,
}

impl CatalogEntry {
    /// Api handle for one namespace, or cluster-wide when `namespace` is `None`
    pub fn api(&self, client: &Client, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if self.namespaced => Api::namespaced_with(client.clone(), ns, &self.resource),
            _ => Api::all_with(client.clone(), &self.resource),
        }
    }
}

/// Every resource type the cluster lets us list, keyed by group resource
#[derive(Clone, Debug, Default)]
pub struct ResourceCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ResourceCatalog {
    pub async fn discover(client: &Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;

        let mut catalog = Self::default();
        for group in discovery.groups() {
            for (resource, caps) in group.recommended_resources() {
                if !caps.supports_operation(verbs::LIST) {
                    continue;
                }
                catalog.insert(resource, &caps);
            }
        }
        debug!(resources = catalog.entries.len(), "Discovered API resources");
        Ok(catalog)
    }

    pub fn insert(&mut self, resource: ApiResource, caps: &ApiCapabilities) {
        self.entries.insert(
            group_resource(&resource),
            CatalogEntry {
                resource,
                namespaced: matches!(caps.scope, Scope::Namespaced),
            },
        );
    }

    pub fn get(&self, group_resource: &str) -> Option<&CatalogEntry> {
        self.entries.get(group_resource)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;

    #[test]
    fn core_resources_have_no_group_suffix() {
        let pv = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("", "v1", "PersistentVolume"),
            "persistentvolumes",
        );
        let deploy = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("apps", "v1", "Deployment"),
            "deployments",
        );
        assert_eq!(group_resource(&pv), "persistentvolumes");
        assert_eq!(group_resource(&deploy), "deployments.apps");
    }
}
