//! Restore execution engine

mod kube_restorer;

pub use kube_restorer::*;

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;

use crate::crd::{Backup, Restore, RestoreResult};
use crate::plugin::RestoreItemAction;

/// Applies a backup archive to the cluster
///
/// Problems are reported through the returned `(warnings, errors)` rather
/// than by failing, so that one bad item never hides the rest of the run.
#[async_trait]
pub trait Restorer: Send + Sync {
    async fn restore(
        &self,
        restore: &Restore,
        backup: &Backup,
        backup_data: &mut (dyn Read + Send),
        log: &mut (dyn Write + Send),
        actions: &[Arc<RestoreItemAction>],
    ) -> (RestoreResult, RestoreResult);
}
