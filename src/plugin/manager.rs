//! In-process plugin registry

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{BackupItemAction, PluginManager, RestoreItemAction};
use crate::cloudprovider::{BlockStore, ObjectStore};
use crate::error::{Error, Result};

type Factory<A> = Box<dyn Fn() -> Arc<A> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum LeaseKind {
    Backup,
    Restore,
}

/// Plugin manager whose actions and providers are compiled into the binary
///
/// Each backup or restore gets fresh action instances. A name can hold at
/// most one set of actions at a time.
#[derive(Default)]
pub struct InProcessManager {
    backup_actions: Vec<(String, Factory<BackupItemAction>)>,
    restore_actions: Vec<(String, Factory<RestoreItemAction>)>,
    object_stores: HashMap<String, Arc<dyn ObjectStore>>,
    block_stores: HashMap<String, Arc<dyn BlockStore>>,
    leases: Mutex<HashSet<(LeaseKind, String)>>,
}

impl InProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backup_action<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<BackupItemAction> + Send + Sync + 'static,
    {
        self.backup_actions.push((name.into(), Box::new(factory)));
        self
    }

    pub fn with_restore_action<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<RestoreItemAction> + Send + Sync + 'static,
    {
        self.restore_actions.push((name.into(), Box::new(factory)));
        self
    }

    pub fn with_object_store(mut self, provider: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.object_stores.insert(provider.into(), store);
        self
    }

    pub fn with_block_store(mut self, provider: impl Into<String>, store: Arc<dyn BlockStore>) -> Self {
        self.block_stores.insert(provider.into(), store);
        self
    }

    fn leases(&self) -> MutexGuard<'_, HashSet<(LeaseKind, String)>> {
        self.leases.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_lease(&self, kind: LeaseKind, name: &str) -> Result<()> {
        if !self.leases().insert((kind, name.to_string())) {
            return Err(Error::plugin(format!(
                "item actions for {:?} {} are already in use",
                kind, name
            )));
        }
        Ok(())
    }

    fn return_lease(&self, kind: LeaseKind, name: &str) {
        if !self.leases().remove(&(kind, name.to_string())) {
            debug!(kind = ?kind, name = %name, "No item actions held, nothing to close");
        }
    }

    /// Whether any backup or restore currently holds actions
    pub fn has_open_leases(&self) -> bool {
        !self.leases().is_empty()
    }
}

impl PluginManager for InProcessManager {
    fn get_backup_item_actions(&self, backup_name: &str) -> Result<Vec<Arc<BackupItemAction>>> {
        self.take_lease(LeaseKind::Backup, backup_name)?;
        Ok(self.backup_actions.iter().map(|(_, factory)| factory()).collect())
    }

    fn close_backup_item_actions(&self, backup_name: &str) -> Result<()> {
        self.return_lease(LeaseKind::Backup, backup_name);
        Ok(())
    }

    fn get_restore_item_actions(&self, restore_name: &str) -> Result<Vec<Arc<RestoreItemAction>>> {
        self.take_lease(LeaseKind::Restore, restore_name)?;
        Ok(self.restore_actions.iter().map(|(_, factory)| factory()).collect())
    }

    fn close_restore_item_actions(&self, restore_name: &str) -> Result<()> {
        self.return_lease(LeaseKind::Restore, restore_name);
        Ok(())
    }

    fn get_block_store(&self, provider: &str) -> Result<Arc<dyn BlockStore>> {
        self.block_stores
            .get(provider)
            .cloned()
            .ok_or_else(|| Error::plugin(format!("unable to locate block store plugin named {}", provider)))
    }

    fn get_object_store(&self, provider: &str) -> Result<Arc<dyn ObjectStore>> {
        self.object_stores
            .get(provider)
            .cloned()
            .ok_or_else(|| Error::plugin(format!("unable to locate object store plugin named {}", provider)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupPVAction;
    use crate::cloudprovider::LocalObjectStore;
    use crate::crd::{Backup, Restore};
    use crate::plugin::ActionLease;

    fn manager() -> Arc<dyn PluginManager> {
        Arc::new(
            InProcessManager::new()
                .with_backup_action("pv", || Arc::new(BackupPVAction::new()))
                .with_object_store("local", Arc::new(LocalObjectStore::new("/tmp/ark"))),
        )
    }

    #[test]
    fn actions_are_released_when_the_lease_drops() {
        let manager = manager();
        {
            let lease = ActionLease::<Backup>::acquire(&manager, "b1").unwrap();
            assert_eq!(lease.actions().len(), 1);
            assert!(ActionLease::<Backup>::acquire(&manager, "b1").is_err());
        }
        assert!(ActionLease::<Backup>::acquire(&manager, "b1").is_ok());
    }

    #[test]
    fn backup_and_restore_leases_are_independent() {
        let manager = manager();
        let _backup = ActionLease::<Backup>::acquire(&manager, "same").unwrap();
        let restore = ActionLease::<Restore>::acquire(&manager, "same").unwrap();
        assert!(restore.actions().is_empty());
    }

    #[test]
    fn providers_are_looked_up_by_name() {
        let manager = manager();
        assert!(manager.get_object_store("local").is_ok());
        assert!(matches!(manager.get_object_store("aws"), Err(Error::Plugin(_))));
        assert!(manager.get_block_store("aws").is_err());
    }
}
