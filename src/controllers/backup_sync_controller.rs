//! Backup sync controller
//!
//! Periodically creates Backup resources for everything found in object
//! storage.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::Context;
use crate::client::KubeApiClient;
use crate::metrics;
use crate::reconcilers::BackupSyncReconciler;

/// Shortest allowed period between sync passes
pub const MIN_SYNC_PERIOD: Duration = Duration::from_secs(60);

/// Clamp a requested sync period to [`MIN_SYNC_PERIOD`]
pub fn effective_sync_period(requested: Duration) -> Duration {
    if requested < MIN_SYNC_PERIOD {
        warn!(
            requested = ?requested,
            minimum = ?MIN_SYNC_PERIOD,
            "Backup sync period is below the minimum, using the minimum"
        );
        MIN_SYNC_PERIOD
    } else {
        requested
    }
}

/// Run sync passes every `period` until shutdown, starting immediately
pub async fn run(ctx: Arc<Context>, period: Duration) {
    let reconciler = BackupSyncReconciler {
        client: Arc::new(KubeApiClient::new(ctx.client.clone())),
        backup_service: ctx.backup_service.clone(),
        bucket: ctx.bucket.clone(),
        namespace: ctx.namespace.clone(),
    };
    run_with(reconciler, period, ctx.shutdown.clone()).await
}

pub(crate) async fn run_with(
    reconciler: BackupSyncReconciler,
    period: Duration,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let period = effective_sync_period(period);
    info!(period = ?period, "Starting BackupSync controller");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match reconciler.sync().await {
                    Ok(summary) => {
                        info!(
                            created = summary.created,
                            existing = summary.already_existing,
                            failed = summary.failed,
                            "Backup sync finished"
                        );
                        metrics::BACKUP_SYNC_RUNS.with_label_values(&["success"]).inc();
                    }
                    Err(e) => {
                        error!(error = %e, "Error syncing backups from object storage");
                        metrics::BACKUP_SYNC_RUNS.with_label_values(&["error"]).inc();
                    }
                }
            }
        }
    }

    info!("BackupSync controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_periods_are_clamped() {
        assert_eq!(effective_sync_period(Duration::from_secs(0)), MIN_SYNC_PERIOD);
        assert_eq!(effective_sync_period(Duration::from_secs(30)), MIN_SYNC_PERIOD);
        assert_eq!(effective_sync_period(Duration::from_secs(60)), MIN_SYNC_PERIOD);
        assert_eq!(
            effective_sync_period(Duration::from_secs(3600)),
            Duration::from_secs(3600)
        );
    }
}
