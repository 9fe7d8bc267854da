//! Backup execution engine

mod kube_backupper;
mod pv_action;
mod scale_action;

pub use kube_backupper::*;
pub use pv_action::*;
pub use scale_action::*;

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

use crate::crd::Backup;
use crate::error::Result;
use crate::plugin::{BackupItemAction, InProcessManager};

/// Current backup format version recorded in `status.version`
pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// Register the built-in backup item actions
///
/// Scaling deployments to zero is opt-in since it changes what every
/// restore brings back.
pub fn with_builtin_backup_actions(manager: InProcessManager, scale_deployments_to_zero: bool) -> InProcessManager {
    let manager = manager.with_backup_action("pv", || -> Arc<BackupItemAction> { Arc::new(BackupPVAction::new()) });
    if !scale_deployments_to_zero {
        return manager;
    }
    manager.with_backup_action("scale-deployment-to-zero", || -> Arc<BackupItemAction> {
        Arc::new(ScaleDeploymentToZero::new())
    })
}

/// Executes a backup into an archive and a log
///
/// Implementations may record results in the backup's status (volume
/// snapshots); the caller decides the final phase.
#[async_trait]
pub trait Backupper: Send + Sync {
    async fn backup(
        &self,
        backup: &mut Backup,
        data: &mut (dyn Write + Send),
        log: &mut (dyn Write + Send),
        actions: &[Arc<BackupItemAction>],
    ) -> Result<()>;
}
