//! Backs up live cluster resources through the Kubernetes API

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use kube::{
    api::{DynamicObject, ListParams},
    core::TypeMeta,
    discovery::ApiResource,
    Client, ResourceExt,
};
use serde_json::Value;
use tracing::{info, warn};

use super::Backupper;
use crate::artifact::{ArchiveEntry, ArchiveWriter, RunLog};
use crate::cloudprovider::SnapshotService;
use crate::crd::{parse_label_selector, Backup, VolumeBackupInfo};
use crate::discovery::ResourceCatalog;
use crate::error::{Error, Result};
use crate::filters::IncludesExcludes;
use crate::plugin::{
    item_labels, item_name, item_namespace, resolve_actions, BackupItemAction, ResolvedAction,
    ResourceIdentifier,
};

pub const PERSISTENT_VOLUMES: &str = "persistentvolumes";

/// Zone labels checked on PersistentVolumes, newest first
const ZONE_LABELS: &[&str] = &[
    "topology.kubernetes.io/zone",
    "failure-domain.beta.kubernetes.io/zone",
];

/// Tag keys attached to every snapshot
const BACKUP_TAG: &str = "ark.heptio.com/backup";
const PV_TAG: &str = "ark.heptio.com/pv";

/// [`Backupper`] that lists resources from the API server
pub struct KubeBackupper {
    client: Client,
    snapshot_service: Option<Arc<dyn SnapshotService>>,
}

impl KubeBackupper {
    pub fn new(client: Client, snapshot_service: Option<Arc<dyn SnapshotService>>) -> Self {
        Self {
            client,
            snapshot_service,
        }
    }
}

#[async_trait]
impl Backupper for KubeBackupper {
    async fn backup(
        &self,
        backup: &mut Backup,
        data: &mut (dyn Write + Send),
        log: &mut (dyn Write + Send),
        actions: &[Arc<BackupItemAction>],
    ) -> Result<()> {
        let request = backup.clone();
        let name = request.name_any();
        let mut log = RunLog::new(log);
        log.info(format!("Starting backup {}", name));

        let catalog = ResourceCatalog::discover(&self.client).await?;
        let actions = resolve_actions(actions)?;

        let spec = &request.spec;
        let resources = IncludesExcludes::new(
            spec.included_resources.iter().cloned(),
            spec.excluded_resources.iter().cloned(),
        );
        let namespaces = IncludesExcludes::new(
            spec.included_namespaces.iter().cloned(),
            spec.excluded_namespaces.iter().cloned(),
        );
        if !spec.hooks.is_empty() {
            log.warn("Backup hooks are not executed by this server; skipping them");
        }

        let mut run = ItemBackupper {
            client: &self.client,
            catalog: &catalog,
            snapshot_service: self.snapshot_service.as_ref(),
            actions: &actions,
            request: &request,
            archive: ArchiveWriter::new(data),
            log,
            seen: HashSet::new(),
            errors: Vec::new(),
            volume_backups: BTreeMap::new(),
        };

        let mut params = ListParams::default();
        if let Some(selector) = parse_label_selector(spec.label_selector.as_ref())? {
            params = params.labels_from(&selector);
        }

        for (group_resource, entry) in catalog.iter() {
            if !resources.should_include_resource(group_resource) {
                continue;
            }
            if !entry.namespaced && !namespaces.includes_all() {
                // Cluster-scoped items only come along as additional items
                // when the backup is limited to some namespaces.
                continue;
            }

            run.log.info(format!("Backing up resource {}", group_resource));
            let list = match entry.api(&self.client, None).list(&params).await {
                Ok(list) => list,
                Err(e) => {
                    run.record_error(format!("error listing {}: {}", group_resource, e));
                    continue;
                }
            };

            for obj in list.items {
                if entry.namespaced && !namespaces.should_include(obj.namespace().as_deref().unwrap_or_default()) {
                    continue;
                }
                match to_item(obj, &entry.resource) {
                    Ok(item) => run.back_up(group_resource.to_string(), item).await,
                    Err(e) => run.record_error(format!("error encoding {}: {}", group_resource, e)),
                }
            }
        }

        let ItemBackupper {
            archive,
            mut log,
            errors,
            volume_backups,
            ..
        } = run;

        let items = archive.finish()?;
        backup.status_mut().volume_backups.extend(volume_backups);
        log.info(format!("Backed up a total of {} items", items));
        info!(backup = %name, items = items, errors = errors.len(), "Backup finished");

        match errors.first() {
            None => Ok(()),
            Some(first) => Err(Error::execution(format!(
                "{} errors occurred during backup, first: {}",
                errors.len(),
                first
            ))),
        }
    }
}

/// State of one backup run
struct ItemBackupper<'a, D: Write, L: Write> {
    client: &'a Client,
    catalog: &'a ResourceCatalog,
    snapshot_service: Option<&'a Arc<dyn SnapshotService>>,
    actions: &'a [ResolvedAction<Backup>],
    request: &'a Backup,
    archive: ArchiveWriter<D>,
    log: RunLog<L>,
    /// (group resource, namespace, name) of every item already handled
    seen: HashSet<(String, Option<String>, String)>,
    errors: Vec<String>,
    volume_backups: BTreeMap<String, VolumeBackupInfo>,
}

impl<D: Write + Send, L: Write + Send> ItemBackupper<'_, D, L> {
    fn record_error(&mut self, msg: String) {
        self.log.error(&msg);
        self.errors.push(msg);
    }

    /// Back up an item plus everything its actions pull in
    async fn back_up(&mut self, group_resource: String, item: Value) {
        let mut pending = VecDeque::from([(group_resource, item)]);

        while let Some((group_resource, item)) = pending.pop_front() {
            let namespace = item_namespace(&item).map(str::to_string);
            let name = item_name(&item).to_string();
            if !self.seen.insert((group_resource.clone(), namespace.clone(), name.clone())) {
                continue;
            }

            match self.back_up_item(&group_resource, namespace, name.clone(), item).await {
                Ok(additional) => pending.extend(additional),
                Err(e) => self.record_error(format!("error backing up {} {}: {}", group_resource, name, e)),
            }
        }
    }

    async fn back_up_item(
        &mut self,
        group_resource: &str,
        namespace: Option<String>,
        name: String,
        mut item: Value,
    ) -> Result<Vec<(String, Value)>> {
        self.log.info(format!(
            "Backing up {} {}/{}",
            group_resource,
            namespace.as_deref().unwrap_or_default(),
            name
        ));

        let mut additional = Vec::new();
        for resolved in self.actions {
            if !resolved.selector.matches(group_resource, &item) {
                continue;
            }
            let output = resolved.action.execute(item, self.request).await?;
            item = output.item;
            if let Some(warning) = output.warning {
                self.log.warn(warning);
            }
            for id in output.additional_items {
                match fetch(self.client, self.catalog, &id).await? {
                    Some(extra) => additional.push((id.group_resource, extra)),
                    None => self.log.warn(format!(
                        "Additional item {} {} not found, skipping",
                        id.group_resource, id.name
                    )),
                }
            }
        }

        if group_resource == PERSISTENT_VOLUMES {
            self.snapshot_volume(&item).await?;
        }

        self.archive.append(&ArchiveEntry {
            group_resource: group_resource.to_string(),
            namespace,
            name,
            object: item,
        })?;
        Ok(additional)
    }

    async fn snapshot_volume(&mut self, pv: &Value) -> Result<()> {
        let pv_name = item_name(pv).to_string();

        if self.request.spec.snapshot_volumes == Some(false) {
            self.log.info(format!("Volume snapshots disabled, skipping {}", pv_name));
            return Ok(());
        }
        let Some(snapshots) = self.snapshot_service else {
            self.log.info(format!("No volume snapshot provider, skipping {}", pv_name));
            return Ok(());
        };

        let volume_id = snapshots.get_volume_id(pv)?;
        if volume_id.is_empty() {
            self.log.info(format!(
                "PersistentVolume {} is not a supported volume type for snapshots, skipping",
                pv_name
            ));
            return Ok(());
        }

        let labels = item_labels(pv);
        let zone = ZONE_LABELS
            .iter()
            .find_map(|label| labels.get(*label))
            .cloned()
            .unwrap_or_default();
        let tags = BTreeMap::from([
            (BACKUP_TAG.to_string(), self.request.name_any()),
            (PV_TAG.to_string(), pv_name.clone()),
        ]);

        self.log.info(format!("Snapshotting PersistentVolume {} (volume {})", pv_name, volume_id));
        let snapshot_id = snapshots.create_snapshot(&volume_id, &zone, &tags).await?;
        let (volume_type, iops) = snapshots.get_volume_info(&volume_id, &zone).await?;
        if volume_type.is_empty() {
            warn!(volume_id = %volume_id, "Provider reported no volume type");
        }

        self.volume_backups.insert(
            pv_name,
            VolumeBackupInfo {
                snapshot_id,
                volume_type,
                availability_zone: zone,
                iops,
            },
        );
        Ok(())
    }
}

/// Get an item an action asked for, `None` if it no longer exists
async fn fetch(client: &Client, catalog: &ResourceCatalog, id: &ResourceIdentifier) -> Result<Option<Value>> {
    let entry = catalog.get(&id.group_resource).ok_or_else(|| {
        Error::execution(format!("resource {} is not served by this cluster", id.group_resource))
    })?;
    let api = entry.api(client, id.namespace.as_deref());
    match api.get_opt(&id.name).await? {
        Some(obj) => Ok(Some(to_item(obj, &entry.resource)?)),
        None => Ok(None),
    }
}

/// Serialize a listed object with its type information filled in
fn to_item(mut obj: DynamicObject, resource: &ApiResource) -> Result<Value> {
    obj.types = Some(TypeMeta {
        api_version: resource.api_version.clone(),
        kind: resource.kind.clone(),
    });
    Ok(serde_json::to_value(&obj)?)
}
