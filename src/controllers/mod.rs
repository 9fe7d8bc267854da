//! Kubernetes controllers for Ark CRDs
//!
//! Each queue-driven controller watches its resource through a reflector,
//! enqueues keys of objects that still need processing, and feeds them to a
//! pool of workers. The backup sync controller runs on a timer instead.

mod backup_controller;
mod backup_sync_controller;
mod restore_controller;
mod runner;

pub use backup_controller::run as run_backup_controller;
pub use backup_sync_controller::{effective_sync_period, run as run_backup_sync_controller, MIN_SYNC_PERIOD};
pub use restore_controller::run as run_restore_controller;
pub use runner::{process_next_work_item, QueueController, SyncHandler};

use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use kube::{
    runtime::{reflector, reflector::Store, watcher, WatchStreamExt},
    Api, Client, Resource,
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::cloudprovider::{BackupService, SnapshotService};
use crate::crd::{Backup, Restore};
use crate::plugin::PluginManager;
use crate::workqueue::WorkQueue;

/// Shared context for all controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Namespace the server watches and keeps its resources in
    pub namespace: String,
    /// Object storage bucket holding backups
    pub bucket: String,
    /// Workers per queue-driven controller
    pub workers: usize,
    pub backup_service: Arc<dyn BackupService>,
    /// Present only when a persistent volume provider is configured
    pub snapshot_service: Option<Arc<dyn SnapshotService>>,
    pub plugin_manager: Arc<dyn PluginManager>,
    pub clock: Arc<dyn Clock>,
    /// Cancelled when the operator is asked to stop
    pub shutdown: CancellationToken,
}

/// Resources whose processing starts from a `New` phase
pub trait Lifecycle {
    fn is_new(&self) -> bool;
    fn phase_name(&self) -> &'static str;
}

impl Lifecycle for Backup {
    fn is_new(&self) -> bool {
        self.phase().is_new()
    }

    fn phase_name(&self) -> &'static str {
        self.phase().as_str()
    }
}

impl Lifecycle for Restore {
    fn is_new(&self) -> bool {
        self.phase().is_new()
    }

    fn phase_name(&self) -> &'static str {
        self.phase().as_str()
    }
}

/// `namespace/name` key of an object, or `name` for cluster-scoped objects
pub fn queue_key<K: Resource>(obj: &K) -> Option<String> {
    let meta = obj.meta();
    let name = meta.name.as_deref().filter(|n| !n.is_empty())?;
    Some(match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    })
}

/// Enqueue an object seen by a watch if it still needs processing
pub fn enqueue_if_new<K: Lifecycle + Resource>(queue: &WorkQueue<String>, obj: &K) {
    if !obj.is_new() {
        debug!(phase = obj.phase_name(), "Object is not new, not enqueuing");
        return;
    }
    match queue_key(obj) {
        Some(key) => queue.add(key),
        None => error!("Error creating queue key, item not added to queue"),
    }
}

/// Start a reflector over `api`, calling `on_apply` for every added or
/// updated object, until `shutdown` fires
pub fn start_informer<K, F>(api: Api<K>, shutdown: CancellationToken, mut on_apply: F) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    F: FnMut(&K) + Send + 'static,
{
    let (reader, writer) = reflector::store();
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects();

    tokio::spawn(async move {
        let mut stream = Box::pin(stream);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(obj)) => on_apply(&obj),
                    Some(Err(e)) => warn!(error = %e, "Watch error"),
                    None => break,
                },
            }
        }
        debug!("Informer stopped");
    });

    reader
}

/// Resolves to `true` once the store has received its initial listing
pub async fn cache_synced<K>(store: Store<K>) -> bool
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store.wait_until_ready().await.is_ok()
}
