//! Backup controller
//!
//! Watches Backup resources in the server namespace and processes new ones.

use std::sync::Arc;

use async_trait::async_trait;
use kube::{api::ListParams, Api};
use tracing::{error, info};

use super::{cache_synced, enqueue_if_new, start_informer, Context, QueueController, SyncHandler};
use crate::backup::KubeBackupper;
use crate::client::KubeApiClient;
use crate::crd::Backup;
use crate::error::Result;
use crate::reconcilers::BackupReconciler;
use crate::workqueue::WorkQueue;

#[async_trait]
impl SyncHandler for BackupReconciler {
    async fn sync(&self, key: &str) -> Result<()> {
        self.process_backup(key).await
    }
}

/// Run the Backup controller until shutdown
pub async fn run(ctx: Arc<Context>) -> Result<()> {
    let api: Api<Backup> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Backup CRD not installed: {}", e);
        return Err(e.into());
    }

    info!("Starting Backup controller");

    let queue = WorkQueue::new("backup");
    let intake = queue.clone();
    let store = start_informer(api, ctx.shutdown.clone(), move |backup: &Backup| {
        enqueue_if_new(&intake, backup)
    });

    let reconciler = BackupReconciler {
        lister: Arc::new(store.clone()),
        client: Arc::new(KubeApiClient::new(ctx.client.clone())),
        backupper: Arc::new(KubeBackupper::new(ctx.client.clone(), ctx.snapshot_service.clone())),
        backup_service: ctx.backup_service.clone(),
        bucket: ctx.bucket.clone(),
        snapshots_allowed: ctx.snapshot_service.is_some(),
        plugin_manager: ctx.plugin_manager.clone(),
        clock: ctx.clock.clone(),
    };

    QueueController::new("Backup", queue, Arc::new(reconciler))
        .run(cache_synced(store), ctx.workers, ctx.shutdown.clone())
        .await
}
