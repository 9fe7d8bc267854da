//! Restore reconciler
//!
//! Handles the business logic for a Restore work item:
//! - Admission (only New restores are processed)
//! - Forcing the non-restorable resources into the exclusion list
//! - Validation, including resolving the backup it restores from
//! - Execution through the [`Restorer`] with scratch files for the archive,
//!   log and results
//! - Upload of the restore log and results next to the backup

use std::collections::HashSet;
use std::io::{Seek, Write};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use kube::ResourceExt;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

use super::{patch_restore, split_key};
use crate::client::{BackupClient, ObjectLister, RestoreClient};
use crate::cloudprovider::BackupService;
use crate::crd::{parse_label_selector, Backup, Restore, RestorePhase, RestoreResult};
use crate::error::Result;
use crate::filters::{union_into, validate_includes_excludes};
use crate::metrics;
use crate::plugin::{ActionLease, PluginManager};
use crate::restore::Restorer;

/// Dependencies of the restore work-item handler
pub struct RestoreReconciler {
    /// Namespace the server keeps its Backups in
    pub namespace: String,
    pub restore_lister: Arc<dyn ObjectLister<Restore>>,
    pub backup_lister: Arc<dyn ObjectLister<Backup>>,
    pub restore_client: Arc<dyn RestoreClient>,
    pub backup_client: Arc<dyn BackupClient>,
    pub restorer: Arc<dyn Restorer>,
    pub backup_service: Arc<dyn BackupService>,
    pub bucket: String,
    /// Whether a persistent volume provider is configured
    pub pv_provider_exists: bool,
    /// Resources always excluded from restores
    pub non_restorable_resources: &'static [&'static str],
    pub plugin_manager: Arc<dyn PluginManager>,
}

impl RestoreReconciler {
    /// Process one `namespace/name` key
    ///
    /// Returns an error only when the work item should be retried.
    #[instrument(skip(self))]
    pub async fn process_restore(&self, key: &str) -> Result<()> {
        let (namespace, name) = split_key(key)?;

        debug!("Getting restore");
        let Some(original) = self.restore_lister.get(&namespace, &name)? else {
            debug!("Restore not found, skipping");
            return Ok(());
        };

        let phase = original.phase();
        if !phase.is_new() {
            debug!(phase = phase.as_str(), "Restore is not new, skipping");
            return Ok(());
        }

        info!(name = %name, "Processing restore");
        let mut restore = (*original).clone();
        union_into(&mut restore.spec.excluded_resources, self.non_restorable_resources);

        let (validation_errors, backup) = self.validate(&restore).await;
        let backup = match backup {
            Some(backup) if validation_errors.is_empty() => {
                restore.status_mut().phase = RestorePhase::InProgress;
                Some(backup)
            }
            _ => {
                warn!(errors = ?validation_errors, "Restore failed validation");
                let status = restore.status_mut();
                status.phase = RestorePhase::FailedValidation;
                status.validation_errors = validation_errors;
                None
            }
        };

        let updated = patch_restore(self.restore_client.as_ref(), &original, &restore).await?;

        let Some(backup) = backup else {
            metrics::RESTORES_TOTAL.with_label_values(&["failed_validation"]).inc();
            return Ok(());
        };

        let original = updated;
        let mut restore = original.clone();
        union_into(&mut restore.spec.excluded_resources, self.non_restorable_resources);

        let (warnings, errors) = {
            let _timer = metrics::RESTORE_DURATION.start_timer();
            self.run_restore(&restore, &backup).await
        };
        metrics::RESTORE_ISSUES
            .with_label_values(&["warning"])
            .inc_by(warnings.count() as f64);
        metrics::RESTORE_ISSUES
            .with_label_values(&["error"])
            .inc_by(errors.count() as f64);
        metrics::RESTORES_TOTAL.with_label_values(&["completed"]).inc();

        let status = restore.status_mut();
        status.warnings = u32::try_from(warnings.count()).unwrap_or(u32::MAX);
        status.errors = u32::try_from(errors.count()).unwrap_or(u32::MAX);
        status.phase = RestorePhase::Completed;
        info!(
            name = %name,
            warnings = status.warnings,
            errors = status.errors,
            "Restore completed"
        );

        // The restore has already happened; a failed status write is not
        // worth running it again.
        if let Err(e) = patch_restore(self.restore_client.as_ref(), &original, &restore).await {
            error!(error = %e, "Error updating restore final status");
        }
        Ok(())
    }

    /// Validate a restore, resolving its backup along the way
    ///
    /// The backup is returned whenever it could be fetched.
    async fn validate(&self, restore: &Restore) -> (Vec<String>, Option<Backup>) {
        let spec = &restore.spec;
        let mut errors = Vec::new();
        let mut backup = None;

        if spec.backup_name.is_empty() {
            errors.push(
                "BackupName must be non-empty and correspond to the name of a backup in object storage."
                    .to_string(),
            );
        } else {
            match self.fetch_backup(&spec.backup_name).await {
                Ok(found) => backup = Some(found),
                Err(e) => errors.push(format!("Error retrieving backup: {}", e)),
            }
        }

        let included: HashSet<&str> = spec.included_resources.iter().map(String::as_str).collect();
        for resource in self.non_restorable_resources {
            if included.contains(resource) {
                errors.push(format!("{} are non-restorable resources", resource));
            }
        }

        for err in validate_includes_excludes(&spec.included_namespaces, &spec.excluded_namespaces) {
            errors.push(format!("Invalid included/excluded namespace lists: {}", err));
        }

        for err in validate_includes_excludes(&spec.included_resources, &spec.excluded_resources) {
            errors.push(format!("Invalid included/excluded resource lists: {}", err));
        }

        if let Err(err) = parse_label_selector(spec.label_selector.as_ref()) {
            errors.push(format!("Invalid label selector: {}", err));
        }

        if !self.pv_provider_exists && spec.restore_pvs == Some(true) {
            errors.push("Server is not configured for PV snapshot restores".to_string());
        }

        (errors, backup)
    }

    /// Resolve a backup from the cache, falling back to object storage
    ///
    /// A backup found only in object storage is also created in the cluster;
    /// failing to create it does not stop the restore.
    async fn fetch_backup(&self, name: &str) -> Result<Backup> {
        if let Some(backup) = self.backup_lister.get(&self.namespace, name)? {
            return Ok((*backup).clone());
        }

        debug!(backup = %name, "Backup not found in cache, checking object storage");
        let mut backup = self.backup_service.get_backup(&self.bucket, name).await?;

        backup.metadata.resource_version = None;
        backup.metadata.namespace = None;

        match self.backup_client.create(&self.namespace, &backup).await {
            Ok(created) => Ok(created),
            Err(e) if e.is_already_exists() => {
                debug!(backup = %name, "Backup already exists in cluster");
                Ok(backup)
            }
            Err(e) => {
                error!(backup = %name, error = %e, "Unable to create API object for Backup");
                Ok(backup)
            }
        }
    }

    /// Execute the restore and upload its log and results
    ///
    /// Never fails: every problem lands in the returned `(warnings, errors)`.
    async fn run_restore(&self, restore: &Restore, backup: &Backup) -> (RestoreResult, RestoreResult) {
        let mut warnings = RestoreResult::default();
        let mut errors = RestoreResult::default();

        let restore_name = restore.name_any();
        let backup_name = restore.spec.backup_name.as_str();

        let archive = match self.backup_service.download_backup(&self.bucket, backup_name).await {
            Ok(archive) => archive,
            Err(e) => {
                error!(backup = %backup_name, error = %e, "Error downloading backup");
                errors.add_ark(format!("error downloading backup: {}", e));
                return (warnings, errors);
            }
        };

        let mut scratch = match ScratchFiles::create(backup_name, &archive) {
            Ok(scratch) => scratch,
            Err(e) => {
                error!(error = %e, "Error creating scratch files");
                errors.add_ark(format!("error creating temp files: {}", e));
                return (warnings, errors);
            }
        };
        drop(archive);

        let lease = match ActionLease::<Restore>::acquire(&self.plugin_manager, &restore_name) {
            Ok(lease) => lease,
            Err(e) => {
                errors.add_ark(e.to_string());
                return (warnings, errors);
            }
        };

        info!(name = %restore_name, backup = %backup_name, "Starting restore");
        let (restore_warnings, restore_errors) = self
            .restorer
            .restore(
                restore,
                backup,
                scratch.backup.as_file_mut(),
                scratch.log.as_file_mut(),
                lease.actions(),
            )
            .await;
        drop(lease);
        warnings.merge(restore_warnings);
        errors.merge(restore_errors);
        info!(name = %restore_name, "Restore executed");

        if let Err(e) = scratch.log.rewind() {
            error!(error = %e, "Error resetting restore log file position");
            errors.add_ark(format!("error resetting log file position: {}", e));
            return (warnings, errors);
        }
        if let Err(e) = self
            .backup_service
            .upload_restore_log(&self.bucket, backup_name, &restore_name, scratch.log.as_file_mut())
            .await
        {
            errors.add_ark(format!("error uploading log file to object storage: {}", e));
        }

        if let Err(e) = write_results(scratch.results.as_file_mut(), &warnings, &errors) {
            error!(error = %e, "Error encoding restore results");
            return (warnings, errors);
        }
        if let Err(e) = scratch.results.rewind() {
            error!(error = %e, "Error resetting results file position");
            return (warnings, errors);
        }
        if let Err(e) = self
            .backup_service
            .upload_restore_results(&self.bucket, backup_name, &restore_name, scratch.results.as_file_mut())
            .await
        {
            errors.add_ark(format!("error uploading results file to object storage: {}", e));
        }

        (warnings, errors)
    }
}

/// Temporary files of one restore run, removed on drop
struct ScratchFiles {
    backup: NamedTempFile,
    log: NamedTempFile,
    results: NamedTempFile,
}

impl ScratchFiles {
    fn create(backup_name: &str, archive: &[u8]) -> std::io::Result<Self> {
        let mut backup = tempfile::Builder::new().prefix(backup_name).tempfile()?;
        backup.write_all(archive)?;
        backup.rewind()?;
        debug!(path = %backup.path().display(), "Wrote backup archive to scratch file");

        Ok(Self {
            backup,
            log: tempfile::Builder::new().prefix("restore-log").tempfile()?,
            results: tempfile::Builder::new().prefix("restore-results").tempfile()?,
        })
    }
}

/// Write `{"warnings": ..., "errors": ...}` gzip-encoded
fn write_results(out: &mut std::fs::File, warnings: &RestoreResult, errors: &RestoreResult) -> Result<()> {
    let mut encoder = GzEncoder::new(out, Compression::default());
    serde_json::to_writer(&mut encoder, &json!({"warnings": warnings, "errors": errors}))?;
    encoder.finish()?;
    Ok(())
}
