//! Scoped ownership of item actions

use std::sync::Arc;

use tracing::{debug, error};

use super::{ItemAction, PluginManager};
use crate::crd::{Backup, Restore};
use crate::error::Result;

type Release = fn(&dyn PluginManager, &str) -> Result<()>;

fn release_backup(manager: &dyn PluginManager, name: &str) -> Result<()> {
    manager.close_backup_item_actions(name)
}

fn release_restore(manager: &dyn PluginManager, name: &str) -> Result<()> {
    manager.close_restore_item_actions(name)
}

/// Item actions acquired for one backup or restore
///
/// The actions are released back to the manager when the lease is dropped, on
/// every exit path.
pub struct ActionLease<R: Send + Sync + 'static> {
    manager: Arc<dyn PluginManager>,
    name: String,
    release: Release,
    actions: Vec<Arc<dyn ItemAction<R>>>,
}

impl ActionLease<Backup> {
    pub fn acquire(manager: &Arc<dyn PluginManager>, backup_name: &str) -> Result<Self> {
        let actions = manager.get_backup_item_actions(backup_name)?;
        debug!(backup = %backup_name, count = actions.len(), "Acquired backup item actions");
        Ok(Self {
            manager: manager.clone(),
            name: backup_name.to_string(),
            release: release_backup,
            actions,
        })
    }
}

impl ActionLease<Restore> {
    pub fn acquire(manager: &Arc<dyn PluginManager>, restore_name: &str) -> Result<Self> {
        let actions = manager.get_restore_item_actions(restore_name)?;
        debug!(restore = %restore_name, count = actions.len(), "Acquired restore item actions");
        Ok(Self {
            manager: manager.clone(),
            name: restore_name.to_string(),
            release: release_restore,
            actions,
        })
    }
}

impl<R: Send + Sync + 'static> ActionLease<R> {
    pub fn actions(&self) -> &[Arc<dyn ItemAction<R>>] {
        &self.actions
    }
}

impl<R: Send + Sync + 'static> Drop for ActionLease<R> {
    fn drop(&mut self) {
        // Drop the action handles before the manager tears them down.
        self.actions.clear();
        if let Err(e) = (self.release)(self.manager.as_ref(), &self.name) {
            error!(name = %self.name, error = %e, "Error closing item actions");
        }
    }
}
