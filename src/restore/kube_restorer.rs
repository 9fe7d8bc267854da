//! Recreates backed-up items through the Kubernetes API

use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DynamicObject, ObjectMeta, PostParams},
    core::{Selector, SelectorExt},
    Client, ResourceExt,
};
use serde_json::{Map, Value};
use tracing::info;

use super::Restorer;
use crate::artifact::{read_archive, ArchiveEntry, RunLog};
use crate::backup::PERSISTENT_VOLUMES;
use crate::cloudprovider::SnapshotService;
use crate::crd::{parse_label_selector, Backup, Restore, RestoreResult, RestoreSpec};
use crate::discovery::ResourceCatalog;
use crate::error::Result;
use crate::filters::IncludesExcludes;
use crate::plugin::{item_labels, resolve_actions, ResolvedAction, RestoreItemAction};

/// Metadata fields carried over from the backed-up object
const PRESERVED_METADATA: &[&str] = &["name", "namespace", "labels", "annotations"];

/// [`Restorer`] that creates items through the API server
pub struct KubeRestorer {
    client: Client,
    snapshot_service: Option<Arc<dyn SnapshotService>>,
}

impl KubeRestorer {
    pub fn new(client: Client, snapshot_service: Option<Arc<dyn SnapshotService>>) -> Self {
        Self {
            client,
            snapshot_service,
        }
    }
}

#[async_trait]
impl Restorer for KubeRestorer {
    async fn restore(
        &self,
        restore: &Restore,
        backup: &Backup,
        backup_data: &mut (dyn Read + Send),
        log: &mut (dyn Write + Send),
        actions: &[Arc<RestoreItemAction>],
    ) -> (RestoreResult, RestoreResult) {
        let warnings = RestoreResult::default();
        let mut errors = RestoreResult::default();
        let mut log = RunLog::new(log);
        log.info(format!(
            "Starting restore {} from backup {}",
            restore.name_any(),
            restore.spec.backup_name
        ));

        let entries = match read_archive(backup_data) {
            Ok(entries) => entries,
            Err(e) => {
                errors.add_ark(format!("error reading backup archive: {}", e));
                return (warnings, errors);
            }
        };
        let catalog = match ResourceCatalog::discover(&self.client).await {
            Ok(catalog) => catalog,
            Err(e) => {
                errors.add_ark(format!("error discovering API resources: {}", e));
                return (warnings, errors);
            }
        };
        let actions = match resolve_actions(actions) {
            Ok(actions) => actions,
            Err(e) => {
                errors.add_ark(format!("error resolving restore item actions: {}", e));
                return (warnings, errors);
            }
        };

        let filter = match RestoreFilter::new(&restore.spec) {
            Ok(filter) => filter,
            Err(e) => {
                errors.add_ark(format!("error parsing label selector: {}", e));
                return (warnings, errors);
            }
        };
        let mut run = ItemRestorer {
            client: &self.client,
            catalog: &catalog,
            snapshot_service: self.snapshot_service.as_ref(),
            actions: &actions,
            restore,
            backup,
            log,
            namespaces_ready: HashSet::new(),
            warnings,
            errors,
            restored: 0,
        };

        for entry in entries {
            if filter.selects(&entry) {
                run.restore_entry(entry).await;
            }
        }

        run.log.info(format!("Restored {} items", run.restored));
        info!(
            restore = %restore.name_any(),
            restored = run.restored,
            warnings = run.warnings.count(),
            errors = run.errors.count(),
            "Restore finished"
        );
        (run.warnings, run.errors)
    }
}

/// Which archive entries a restore asks for
pub struct RestoreFilter {
    resources: IncludesExcludes,
    namespaces: IncludesExcludes,
    labels: Option<Selector>,
}

impl RestoreFilter {
    pub fn new(spec: &RestoreSpec) -> Result<Self> {
        Ok(Self {
            resources: IncludesExcludes::new(
                spec.included_resources.iter().cloned(),
                spec.excluded_resources.iter().cloned(),
            ),
            namespaces: IncludesExcludes::new(
                spec.included_namespaces.iter().cloned(),
                spec.excluded_namespaces.iter().cloned(),
            ),
            labels: parse_label_selector(spec.label_selector.as_ref())?,
        })
    }

    /// Cluster-scoped entries pass any namespace filter
    pub fn selects(&self, entry: &ArchiveEntry) -> bool {
        if !self.resources.should_include_resource(&entry.group_resource) {
            return false;
        }
        if let Some(namespace) = &entry.namespace {
            if !self.namespaces.should_include(namespace) {
                return false;
            }
        }
        match &self.labels {
            Some(selector) => selector.matches(&item_labels(&entry.object)),
            None => true,
        }
    }
}

/// Strip server-populated metadata and status from a backed-up object
pub fn reset_metadata_and_status(mut item: Value) -> Value {
    if let Value::Object(map) = &mut item {
        map.remove("status");
        if let Some(Value::Object(metadata)) = map.get_mut("metadata") {
            let kept: Map<String, Value> = metadata
                .iter()
                .filter(|(key, _)| PRESERVED_METADATA.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            *metadata = kept;
        }
    }
    item
}

/// State of one restore run
struct ItemRestorer<'a, L: Write> {
    client: &'a Client,
    catalog: &'a ResourceCatalog,
    snapshot_service: Option<&'a Arc<dyn SnapshotService>>,
    actions: &'a [ResolvedAction<Restore>],
    restore: &'a Restore,
    backup: &'a Backup,
    log: RunLog<L>,
    namespaces_ready: HashSet<String>,
    warnings: RestoreResult,
    errors: RestoreResult,
    restored: usize,
}

impl<L: Write + Send> ItemRestorer<'_, L> {
    async fn restore_entry(&mut self, entry: ArchiveEntry) {
        let target_namespace = entry.namespace.as_ref().map(|ns| {
            self.restore
                .spec
                .namespace_mapping
                .get(ns)
                .cloned()
                .unwrap_or_else(|| ns.clone())
        });
        let description = format!("{} {}", entry.group_resource, entry.name);

        if let Err(e) = self.restore_item(entry, target_namespace.as_deref()).await {
            let msg = format!("error restoring {}: {}", description, e);
            self.log.error(&msg);
            self.errors.add(target_namespace.as_deref(), msg);
        }
    }

    async fn restore_item(&mut self, entry: ArchiveEntry, namespace: Option<&str>) -> Result<()> {
        let catalog = self.catalog;
        let Some(resource) = catalog.get(&entry.group_resource) else {
            self.warnings.add(
                namespace,
                format!(
                    "resource {} is not served by this cluster, skipping {}",
                    entry.group_resource, entry.name
                ),
            );
            return Ok(());
        };

        if let Some(ns) = namespace {
            self.ensure_namespace(ns).await?;
        }

        let mut item = reset_metadata_and_status(entry.object);
        if let (Some(ns), Some(Value::Object(metadata))) = (namespace, item.get_mut("metadata")) {
            metadata.insert("namespace".to_string(), Value::String(ns.to_string()));
        }

        if entry.group_resource == PERSISTENT_VOLUMES {
            item = self.restore_volume(item, &entry.name).await?;
        }

        let actions = self.actions;
        for resolved in actions {
            if !resolved.selector.matches(&entry.group_resource, &item) {
                continue;
            }
            let output = resolved.action.execute(item, self.restore).await?;
            item = output.item;
            if let Some(warning) = output.warning {
                self.warnings.add(namespace, warning);
            }
        }

        let obj: DynamicObject = serde_json::from_value(item)?;
        let api = resource.api(self.client, namespace);
        match api.create(&PostParams::default(), &obj).await {
            Ok(_) => {
                self.log.info(format!("Restored {} {}", entry.group_resource, entry.name));
                self.restored += 1;
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                self.warnings.add(
                    namespace,
                    format!(
                        "not restored: {} \"{}\" already exists in the cluster",
                        entry.group_resource, entry.name
                    ),
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_namespace(&mut self, namespace: &str) -> Result<()> {
        if self.namespaces_ready.contains(namespace) {
            return Ok(());
        }

        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => self.log.info(format!("Created namespace {}", namespace)),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {}
            Err(e) => return Err(e.into()),
        }

        self.namespaces_ready.insert(namespace.to_string());
        Ok(())
    }

    /// Point a PersistentVolume at a fresh volume created from its snapshot
    async fn restore_volume(&mut self, pv: Value, pv_name: &str) -> Result<Value> {
        if self.restore.spec.restore_pvs == Some(false) {
            self.log.info(format!("Snapshot restores disabled, restoring {} as-is", pv_name));
            return Ok(pv);
        }

        let backup_info = self
            .backup
            .status
            .as_ref()
            .and_then(|status| status.volume_backups.get(pv_name));
        let Some(info) = backup_info else {
            return Ok(pv);
        };
        let Some(snapshots) = self.snapshot_service else {
            self.warnings.add(
                None,
                format!(
                    "no volume snapshot provider configured, restoring {} without its snapshot",
                    pv_name
                ),
            );
            return Ok(pv);
        };

        self.log.info(format!(
            "Creating volume for {} from snapshot {}",
            pv_name, info.snapshot_id
        ));
        let volume_id = snapshots
            .create_volume_from_snapshot(
                &info.snapshot_id,
                &info.volume_type,
                &info.availability_zone,
                info.iops,
            )
            .await?;
        snapshots.set_volume_id(pv, &volume_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::LabelSelector;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
    use serde_json::json;

    fn entry(group_resource: &str, namespace: Option<&str>, labels: Value) -> ArchiveEntry {
        ArchiveEntry {
            group_resource: group_resource.to_string(),
            namespace: namespace.map(str::to_string),
            name: "item".to_string(),
            object: json!({"metadata": {"name": "item", "labels": labels}}),
        }
    }

    #[test]
    fn filter_honours_lists_and_labels() {
        let spec = RestoreSpec {
            included_namespaces: vec!["ns-1".into()],
            excluded_resources: vec!["nodes".into(), "secrets".into()],
            label_selector: Some(LabelSelector {
                match_labels: Some([("app".to_string(), "web".to_string())].into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let filter = RestoreFilter::new(&spec).unwrap();

        assert!(filter.selects(&entry("pods", Some("ns-1"), json!({"app": "web"}))));
        assert!(!filter.selects(&entry("pods", Some("ns-2"), json!({"app": "web"}))));
        assert!(!filter.selects(&entry("secrets", Some("ns-1"), json!({"app": "web"}))));
        assert!(!filter.selects(&entry("pods", Some("ns-1"), json!({"app": "db"}))));
        assert!(filter.selects(&entry("persistentvolumes", None, json!({"app": "web"}))));
    }

    #[test]
    fn filter_honours_label_expressions() {
        let spec = RestoreSpec {
            label_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: "app".to_string(),
                    operator: "NotIn".to_string(),
                    values: Some(vec!["db".to_string()]),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let filter = RestoreFilter::new(&spec).unwrap();

        assert!(filter.selects(&entry("pods", Some("ns-1"), json!({"app": "web"}))));
        assert!(filter.selects(&entry("pods", Some("ns-1"), json!({}))));
        assert!(!filter.selects(&entry("pods", Some("ns-1"), json!({"app": "db"}))));
    }

    #[test]
    fn invalid_selectors_are_rejected() {
        let spec = RestoreSpec {
            label_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: "app".to_string(),
                    operator: "In".to_string(),
                    values: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(RestoreFilter::new(&spec).is_err());
    }

    #[test]
    fn server_fields_are_stripped() {
        let item = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm",
                "namespace": "ns-1",
                "labels": {"a": "b"},
                "uid": "1234",
                "resourceVersion": "99",
                "creationTimestamp": "2018-01-01T00:00:00Z"
            },
            "data": {"k": "v"},
            "status": {"phase": "Active"}
        });

        assert_eq!(
            reset_metadata_and_status(item),
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "cm", "namespace": "ns-1", "labels": {"a": "b"}},
                "data": {"k": "v"}
            })
        );
    }
}
