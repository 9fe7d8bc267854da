//! In-memory fakes shared by the reconciler integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use ark_operator::backup::Backupper;
use ark_operator::client::{BackupClient, ObjectLister, RestoreClient};
use ark_operator::cloudprovider::BackupService;
use ark_operator::crd::{Backup, BackupSpec, Restore, RestoreResult, RestoreSpec};
use ark_operator::error::{Error, Result};
use ark_operator::plugin::{BackupItemAction, RestoreItemAction};
use ark_operator::restore::Restorer;

pub const NAMESPACE: &str = "heptio-ark";
pub const BUCKET: &str = "ark-bucket";

pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 8, 1, 12, 0, 0).unwrap()
}

pub fn backup(name: &str, spec: BackupSpec) -> Backup {
    let mut backup = Backup::new(name, spec);
    backup.metadata.namespace = Some(NAMESPACE.to_string());
    backup.metadata.resource_version = Some("1".to_string());
    backup
}

pub fn restore(name: &str, spec: RestoreSpec) -> Restore {
    let mut restore = Restore::new(name, spec);
    restore.metadata.namespace = Some(NAMESPACE.to_string());
    restore.metadata.resource_version = Some("1".to_string());
    restore
}

// ============================================================================
// Listers
// ============================================================================

/// Lister over a fixed set of objects
pub struct MapLister<K> {
    objects: Mutex<HashMap<(String, String), Arc<K>>>,
}

impl<K: Resource> MapLister<K> {
    pub fn new(objects: Vec<K>) -> Self {
        let objects = objects
            .into_iter()
            .map(|obj| ((obj.namespace().unwrap_or_default(), obj.name_any()), Arc::new(obj)))
            .collect();
        Self {
            objects: Mutex::new(objects),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl<K: Send + Sync> ObjectLister<K> for MapLister<K> {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.get(&(namespace.to_string(), name.to_string())).cloned())
    }
}

// ============================================================================
// API clients
// ============================================================================

fn apply_merge_patch<K: Serialize + DeserializeOwned>(original: &K, patch: &Value) -> Result<K> {
    let mut doc = serde_json::to_value(original)?;
    json_patch::merge(&mut doc, patch);
    Ok(serde_json::from_value(doc)?)
}

/// Records patches and creations of Backups
#[derive(Default)]
pub struct FakeBackupClient {
    pub patches: Mutex<Vec<Value>>,
    /// Object state after the most recent patch
    pub latest: Mutex<Option<Backup>>,
    pub created: Mutex<Vec<(String, Backup)>>,
    /// Names whose creation reports that they already exist
    pub existing: Mutex<HashSet<String>>,
    /// Names whose creation fails outright
    pub broken: Mutex<HashSet<String>>,
    pub reject_patches: AtomicBool,
}

impl FakeBackupClient {
    pub fn patches(&self) -> Vec<Value> {
        self.patches.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Backup {
        self.latest.lock().unwrap().clone().expect("no patch applied")
    }

    pub fn created(&self) -> Vec<(String, Backup)> {
        self.created.lock().unwrap().clone()
    }

    pub fn mark_existing(&self, name: &str) {
        self.existing.lock().unwrap().insert(name.to_string());
    }

    pub fn mark_broken(&self, name: &str) {
        self.broken.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl BackupClient for FakeBackupClient {
    async fn patch(&self, original: &Backup, patch: &Value) -> Result<Backup> {
        if self.reject_patches.load(Ordering::SeqCst) {
            return Err(Error::execution("patch rejected"));
        }
        self.patches.lock().unwrap().push(patch.clone());
        let patched: Backup = apply_merge_patch(original, patch)?;
        *self.latest.lock().unwrap() = Some(patched.clone());
        Ok(patched)
    }

    async fn create(&self, namespace: &str, backup: &Backup) -> Result<Backup> {
        let name = backup.name_any();
        if self.broken.lock().unwrap().contains(&name) {
            return Err(Error::storage(format!("unable to create {}", name)));
        }
        if !self.existing.lock().unwrap().insert(name.clone()) {
            return Err(Error::AlreadyExists(format!("{}/{}", namespace, name)));
        }
        self.created
            .lock()
            .unwrap()
            .push((namespace.to_string(), backup.clone()));
        let mut created = backup.clone();
        created.metadata.namespace = Some(namespace.to_string());
        Ok(created)
    }
}

/// Records patches of Restores
#[derive(Default)]
pub struct FakeRestoreClient {
    pub patches: Mutex<Vec<Value>>,
    pub latest: Mutex<Option<Restore>>,
}

impl FakeRestoreClient {
    pub fn patches(&self) -> Vec<Value> {
        self.patches.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Restore {
        self.latest.lock().unwrap().clone().expect("no patch applied")
    }
}

#[async_trait]
impl RestoreClient for FakeRestoreClient {
    async fn patch(&self, original: &Restore, patch: &Value) -> Result<Restore> {
        self.patches.lock().unwrap().push(patch.clone());
        let patched: Restore = apply_merge_patch(original, patch)?;
        *self.latest.lock().unwrap() = Some(patched.clone());
        Ok(patched)
    }
}

// ============================================================================
// Object storage
// ============================================================================

#[derive(Clone, Debug)]
pub struct UploadedBackup {
    pub name: String,
    pub metadata: Backup,
    pub data: Vec<u8>,
    pub log: Vec<u8>,
}

/// In-memory backup storage
#[derive(Default)]
pub struct FakeBackupService {
    pub uploads: Mutex<Vec<UploadedBackup>>,
    /// Backup metadata by name
    pub stored: Mutex<BTreeMap<String, Backup>>,
    /// Archive bytes by backup name
    pub archives: Mutex<HashMap<String, Vec<u8>>>,
    /// (backup, restore) -> log
    pub restore_logs: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub restore_results: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub fail_uploads: AtomicBool,
    pub fail_listing: AtomicBool,
    pub fail_restore_log_uploads: AtomicBool,
    pub fail_restore_results_uploads: AtomicBool,
}

impl FakeBackupService {
    pub fn with_backups(backups: Vec<Backup>) -> Self {
        let service = Self::default();
        for backup in backups {
            let name = backup.name_any();
            service.archives.lock().unwrap().insert(name.clone(), b"archive".to_vec());
            service.stored.lock().unwrap().insert(name, backup);
        }
        service
    }

    pub fn uploads(&self) -> Vec<UploadedBackup> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn restore_log(&self, backup: &str, restore: &str) -> Option<Vec<u8>> {
        self.restore_logs
            .lock()
            .unwrap()
            .get(&(backup.to_string(), restore.to_string()))
            .cloned()
    }

    pub fn restore_results(&self, backup: &str, restore: &str) -> Option<Vec<u8>> {
        self.restore_results
            .lock()
            .unwrap()
            .get(&(backup.to_string(), restore.to_string()))
            .cloned()
    }
}

fn read_all(reader: &mut (dyn Read + Send)) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

#[async_trait]
impl BackupService for FakeBackupService {
    async fn upload_backup(
        &self,
        _bucket: &str,
        name: &str,
        metadata: &[u8],
        data: &mut (dyn Read + Send),
        log: &mut (dyn Read + Send),
    ) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::storage("bucket unavailable"));
        }
        let upload = UploadedBackup {
            name: name.to_string(),
            metadata: serde_json::from_slice(metadata)?,
            data: read_all(data)?,
            log: read_all(log)?,
        };
        self.uploads.lock().unwrap().push(upload);
        Ok(())
    }

    async fn download_backup(&self, _bucket: &str, name: &str) -> Result<Vec<u8>> {
        self.archives
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::storage(format!("key not found: {}", name)))
    }

    async fn get_backup(&self, _bucket: &str, name: &str) -> Result<Backup> {
        self.stored
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::storage(format!("key not found: {}/ark-backup.json", name)))
    }

    async fn get_all_backups(&self, _bucket: &str) -> Result<Vec<Backup>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::storage("unable to list bucket"));
        }
        Ok(self.stored.lock().unwrap().values().cloned().collect())
    }

    async fn upload_restore_log(
        &self,
        _bucket: &str,
        backup_name: &str,
        restore_name: &str,
        log: &mut (dyn Read + Send),
    ) -> Result<()> {
        if self.fail_restore_log_uploads.load(Ordering::SeqCst) {
            return Err(Error::storage("bucket unavailable"));
        }
        let log = read_all(log)?;
        self.restore_logs
            .lock()
            .unwrap()
            .insert((backup_name.to_string(), restore_name.to_string()), log);
        Ok(())
    }

    async fn upload_restore_results(
        &self,
        _bucket: &str,
        backup_name: &str,
        restore_name: &str,
        results: &mut (dyn Read + Send),
    ) -> Result<()> {
        if self.fail_restore_results_uploads.load(Ordering::SeqCst) {
            return Err(Error::storage("bucket unavailable"));
        }
        let results = read_all(results)?;
        self.restore_results
            .lock()
            .unwrap()
            .insert((backup_name.to_string(), restore_name.to_string()), results);
        Ok(())
    }
}

// ============================================================================
// Engines
// ============================================================================

/// Backupper that writes fixed content and optionally fails
#[derive(Default)]
pub struct FakeBackupper {
    pub calls: AtomicUsize,
    pub failure: Mutex<Option<String>>,
}

impl FakeBackupper {
    pub fn failing(msg: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failure: Mutex::new(Some(msg.to_string())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backupper for FakeBackupper {
    async fn backup(
        &self,
        backup: &mut Backup,
        data: &mut (dyn Write + Send),
        log: &mut (dyn Write + Send),
        _actions: &[Arc<BackupItemAction>],
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        data.write_all(b"items")?;
        writeln!(log, "backing up {}", backup.name_any())?;
        match self.failure.lock().unwrap().clone() {
            Some(msg) => Err(Error::execution(msg)),
            None => Ok(()),
        }
    }
}

/// Restorer that reports fixed results and remembers what it was asked
#[derive(Default)]
pub struct FakeRestorer {
    pub warnings: RestoreResult,
    pub errors: RestoreResult,
    /// Restores seen, with the archive content they were handed
    pub seen: Mutex<Vec<(Restore, Vec<u8>)>>,
}

impl FakeRestorer {
    pub fn returning(warnings: RestoreResult, errors: RestoreResult) -> Self {
        Self {
            warnings,
            errors,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<(Restore, Vec<u8>)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Restorer for FakeRestorer {
    async fn restore(
        &self,
        restore: &Restore,
        _backup: &Backup,
        backup_data: &mut (dyn Read + Send),
        log: &mut (dyn Write + Send),
        _actions: &[Arc<RestoreItemAction>],
    ) -> (RestoreResult, RestoreResult) {
        let mut archive = Vec::new();
        let _ = backup_data.read_to_end(&mut archive);
        let _ = writeln!(log, "restoring {}", restore.name_any());
        self.seen.lock().unwrap().push((restore.clone(), archive));
        (self.warnings.clone(), self.errors.clone())
    }
}
