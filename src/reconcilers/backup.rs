//! Backup reconciler
//!
//! Handles the business logic for a Backup work item:
//! - Admission (only New backups are processed)
//! - Spec validation
//! - Execution through the [`Backupper`] with the backup's item actions
//! - Upload of metadata, archive and log to object storage
//! - Status updates as merge patches

use std::io::Seek;
use std::sync::Arc;

use chrono::Duration;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::{patch_backup, split_key};
use crate::backup::{Backupper, BACKUP_FORMAT_VERSION};
use crate::client::{BackupClient, ObjectLister};
use crate::clock::Clock;
use crate::cloudprovider::BackupService;
use crate::crd::{parse_label_selector, Backup, BackupPhase, BackupSpec};
use crate::error::Result;
use crate::filters::validate_includes_excludes;
use crate::metrics;
use crate::plugin::{ActionLease, PluginManager};

/// Dependencies of the backup work-item handler
pub struct BackupReconciler {
    pub lister: Arc<dyn ObjectLister<Backup>>,
    pub client: Arc<dyn BackupClient>,
    pub backupper: Arc<dyn Backupper>,
    pub backup_service: Arc<dyn BackupService>,
    pub bucket: String,
    /// Whether a persistent volume provider is configured
    pub snapshots_allowed: bool,
    pub plugin_manager: Arc<dyn PluginManager>,
    pub clock: Arc<dyn Clock>,
}

/// Validate a backup spec, returning one message per problem
pub fn validate_backup(spec: &BackupSpec, snapshots_allowed: bool) -> Vec<String> {
    let mut errors = Vec::new();

    for err in validate_includes_excludes(&spec.included_resources, &spec.excluded_resources) {
        errors.push(format!("Invalid included/excluded resource lists: {}", err));
    }

    for err in validate_includes_excludes(&spec.included_namespaces, &spec.excluded_namespaces) {
        errors.push(format!("Invalid included/excluded namespace lists: {}", err));
    }

    if let Err(err) = parse_label_selector(spec.label_selector.as_ref()) {
        errors.push(format!("Invalid label selector: {}", err));
    }

    if !snapshots_allowed && spec.snapshot_volumes == Some(true) {
        errors.push("Server is not configured for PV snapshots".to_string());
    }

    errors
}

impl BackupReconciler {
    /// Process one `namespace/name` key
    ///
    /// Returns an error only when the work item should be retried.
    #[instrument(skip(self))]
    pub async fn process_backup(&self, key: &str) -> Result<()> {
        let (namespace, name) = split_key(key)?;

        debug!("Getting backup");
        let Some(original) = self.lister.get(&namespace, &name)? else {
            debug!("Backup not found, skipping");
            return Ok(());
        };

        let phase = original.phase();
        if !phase.is_new() {
            debug!(phase = phase.as_str(), "Backup is not new, skipping");
            return Ok(());
        }

        info!(name = %name, "Processing backup");
        let mut backup = (*original).clone();

        let validation_errors = validate_backup(&backup.spec, self.snapshots_allowed);
        let failed_validation = !validation_errors.is_empty();
        let now = self.clock.now();
        let ttl_seconds = backup.spec.ttl_seconds;
        let status = backup.status_mut();
        if failed_validation {
            warn!(errors = ?validation_errors, "Backup failed validation");
            status.phase = BackupPhase::FailedValidation;
            status.validation_errors = validation_errors;
        } else {
            status.phase = BackupPhase::InProgress;
            status.version = BACKUP_FORMAT_VERSION;
            if ttl_seconds > 0 {
                status.expiration = i64::try_from(ttl_seconds)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .and_then(|ttl| now.checked_add_signed(ttl));
            }
        }

        // Persist the new phase before doing any work.
        let updated = patch_backup(self.client.as_ref(), &original, &backup).await?;

        if failed_validation {
            metrics::BACKUPS_TOTAL.with_label_values(&["failed_validation"]).inc();
            return Ok(());
        }

        let original = updated;
        let mut backup = original.clone();

        let _timer = metrics::BACKUP_DURATION.start_timer();
        backup.status_mut().start_timestamp = Some(self.clock.now());
        if let Err(e) = self.run_backup(&mut backup).await {
            error!(error = %e, "Backup failed");
            let now = self.clock.now();
            let status = backup.status_mut();
            status.phase = BackupPhase::Failed;
            status.completion_timestamp.get_or_insert(now);
        }

        let outcome = match backup.phase() {
            BackupPhase::Completed => "completed",
            _ => "failed",
        };
        metrics::BACKUPS_TOTAL.with_label_values(&[outcome]).inc();
        info!(name = %name, phase = backup.phase().as_str(), "Backup finished");

        patch_backup(self.client.as_ref(), &original, &backup).await?;
        Ok(())
    }

    /// Execute the backup and upload its artifacts
    ///
    /// Sets the phase and completion time before the metadata is serialized,
    /// so the uploaded copy records how the run ended.
    async fn run_backup(&self, backup: &mut Backup) -> Result<()> {
        let name = backup.name_any();
        let lease = ActionLease::<Backup>::acquire(&self.plugin_manager, &name)?;

        let mut data = tempfile::tempfile()?;
        let mut log = tempfile::tempfile()?;

        info!(name = %name, "Starting backup");
        let backup_result = self
            .backupper
            .backup(backup, &mut data, &mut log, lease.actions())
            .await;
        drop(lease);

        let now = self.clock.now();
        let status = backup.status_mut();
        status.phase = match &backup_result {
            Ok(()) => BackupPhase::Completed,
            Err(_) => BackupPhase::Failed,
        };
        status.completion_timestamp = Some(now);

        let metadata = serde_json::to_vec(backup)?;
        data.rewind()?;
        log.rewind()?;

        info!(name = %name, "Uploading backup");
        let upload_result = self
            .backup_service
            .upload_backup(&self.bucket, &name, &metadata, &mut data, &mut log)
            .await;

        backup_result?;
        upload_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> BackupSpec {
        BackupSpec::default()
    }

    #[test]
    fn default_spec_is_valid() {
        assert!(validate_backup(&spec(), false).is_empty());
    }

    #[test]
    fn overlapping_lists_are_reported_per_kind() {
        let spec = BackupSpec {
            included_resources: vec!["foo".into()],
            excluded_resources: vec!["foo".into()],
            included_namespaces: vec!["ns".into()],
            excluded_namespaces: vec!["ns".into()],
            ..spec()
        };
        let errors = validate_backup(&spec, true);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("Invalid included/excluded resource lists: "));
        assert!(errors[1].starts_with("Invalid included/excluded namespace lists: "));
    }

    #[test]
    fn unparseable_label_selectors_are_reported() {
        let spec: BackupSpec = serde_json::from_value(serde_json::json!({
            "labelSelector": {"matchExpressions": [{"key": "app", "operator": "In"}]}
        }))
        .unwrap();
        let errors = validate_backup(&spec, true);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Invalid label selector: "), "{}", errors[0]);
    }

    #[test]
    fn snapshots_require_a_provider() {
        let spec = BackupSpec {
            snapshot_volumes: Some(true),
            ..spec()
        };
        assert_eq!(
            validate_backup(&spec, false),
            vec!["Server is not configured for PV snapshots".to_string()]
        );
        assert!(validate_backup(&spec, true).is_empty());

        let auto = BackupSpec {
            snapshot_volumes: None,
            ..BackupSpec::default()
        };
        assert!(validate_backup(&auto, false).is_empty());
    }
}
