//! Restore controller
//!
//! Watches Restore resources in the server namespace and processes new ones.
//! Backups are watched too, so restores can resolve them from the cache.

use std::sync::Arc;

use async_trait::async_trait;
use kube::{api::ListParams, Api};
use tracing::{error, info};

use super::{cache_synced, enqueue_if_new, start_informer, Context, QueueController, SyncHandler};
use crate::client::KubeApiClient;
use crate::crd::{Backup, Restore, NON_RESTORABLE_RESOURCES};
use crate::error::Result;
use crate::reconcilers::RestoreReconciler;
use crate::restore::KubeRestorer;
use crate::workqueue::WorkQueue;

#[async_trait]
impl SyncHandler for RestoreReconciler {
    async fn sync(&self, key: &str) -> Result<()> {
        self.process_restore(key).await
    }
}

/// Run the Restore controller until shutdown
pub async fn run(ctx: Arc<Context>) -> Result<()> {
    let restores: Api<Restore> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let backups: Api<Backup> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    // Verify CRD is installed
    if let Err(e) = restores.list(&ListParams::default().limit(1)).await {
        error!("Restore CRD not installed: {}", e);
        return Err(e.into());
    }

    info!("Starting Restore controller");

    let queue = WorkQueue::new("restore");
    let intake = queue.clone();
    let restore_store = start_informer(restores, ctx.shutdown.clone(), move |restore: &Restore| {
        enqueue_if_new(&intake, restore)
    });
    let backup_store = start_informer(backups, ctx.shutdown.clone(), |_: &Backup| {});

    let client = Arc::new(KubeApiClient::new(ctx.client.clone()));
    let reconciler = RestoreReconciler {
        namespace: ctx.namespace.clone(),
        restore_lister: Arc::new(restore_store.clone()),
        backup_lister: Arc::new(backup_store.clone()),
        restore_client: client.clone(),
        backup_client: client,
        restorer: Arc::new(KubeRestorer::new(ctx.client.clone(), ctx.snapshot_service.clone())),
        backup_service: ctx.backup_service.clone(),
        bucket: ctx.bucket.clone(),
        pv_provider_exists: ctx.snapshot_service.is_some(),
        non_restorable_resources: NON_RESTORABLE_RESOURCES,
        plugin_manager: ctx.plugin_manager.clone(),
    };

    let caches = async move { cache_synced(restore_store).await && cache_synced(backup_store).await };

    QueueController::new("Restore", queue, Arc::new(reconciler))
        .run(caches, ctx.workers, ctx.shutdown.clone())
        .await
}
