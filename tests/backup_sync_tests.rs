//! Integration tests for syncing backups from object storage

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use ark_operator::crd::{Backup, BackupSpec};
use ark_operator::reconcilers::{BackupSyncReconciler, SyncSummary};

use common::*;

fn reconciler(stored: Vec<Backup>) -> (Arc<FakeBackupClient>, Arc<FakeBackupService>, BackupSyncReconciler) {
    let client = Arc::new(FakeBackupClient::default());
    let service = Arc::new(FakeBackupService::with_backups(stored));
    let reconciler = BackupSyncReconciler {
        client: client.clone(),
        backup_service: service.clone(),
        bucket: BUCKET.to_string(),
        namespace: NAMESPACE.to_string(),
    };
    (client, service, reconciler)
}

fn stored_backup(name: &str) -> Backup {
    let mut backup = backup(name, BackupSpec::default());
    backup.metadata.namespace = Some("old-namespace".to_string());
    backup.metadata.resource_version = Some("1234".to_string());
    backup
}

#[tokio::test]
async fn sync_is_idempotent() {
    let (client, _, reconciler) = reconciler(vec![stored_backup("b1"), stored_backup("b2")]);

    let first = reconciler.sync().await.unwrap();
    assert_eq!(
        first,
        SyncSummary {
            created: 2,
            already_existing: 0,
            failed: 0
        }
    );

    let second = reconciler.sync().await.unwrap();
    assert_eq!(
        second,
        SyncSummary {
            created: 0,
            already_existing: 2,
            failed: 0
        }
    );
    assert_eq!(client.created().len(), 2);
}

#[tokio::test]
async fn synced_backups_are_placed_in_the_server_namespace() {
    let (client, _, reconciler) = reconciler(vec![stored_backup("b1")]);

    reconciler.sync().await.unwrap();

    let created = client.created();
    assert_eq!(created[0].0, NAMESPACE);
    assert_eq!(created[0].1.metadata.namespace.as_deref(), Some(NAMESPACE));
    assert!(created[0].1.metadata.resource_version.is_none());
}

#[tokio::test]
async fn gc_finalizer_is_stripped() {
    let mut only_gc = stored_backup("b1");
    only_gc.metadata.finalizers = Some(vec!["gc.ark.heptio.com".to_string()]);
    let mut mixed = stored_backup("b2");
    mixed.metadata.finalizers = Some(vec![
        "gc.ark.heptio.com".to_string(),
        "example.com/keep".to_string(),
    ]);
    let (client, _, reconciler) = reconciler(vec![only_gc, mixed]);

    reconciler.sync().await.unwrap();

    let created = client.created();
    let b1 = created.iter().find(|(_, b)| b.metadata.name.as_deref() == Some("b1")).unwrap();
    let b2 = created.iter().find(|(_, b)| b.metadata.name.as_deref() == Some("b2")).unwrap();
    assert!(b1.1.metadata.finalizers.is_none());
    assert_eq!(
        b2.1.metadata.finalizers,
        Some(vec!["example.com/keep".to_string()])
    );
}

#[tokio::test]
async fn one_failing_backup_does_not_stop_the_pass() {
    let (client, _, reconciler) = reconciler(vec![stored_backup("b1"), stored_backup("b2"), stored_backup("b3")]);
    client.mark_broken("b2");

    let summary = reconciler.sync().await.unwrap();

    assert_eq!(summary.created, 2);
    assert_eq!(summary.failed, 1);
    let names: Vec<_> = client
        .created()
        .into_iter()
        .filter_map(|(_, b)| b.metadata.name)
        .collect();
    assert_eq!(names, vec!["b1", "b3"]);
}

#[tokio::test]
async fn listing_failure_fails_the_pass() {
    let (client, service, reconciler) = reconciler(vec![stored_backup("b1")]);
    service.fail_listing.store(true, Ordering::SeqCst);

    assert!(reconciler.sync().await.is_err());
    assert!(client.created().is_empty());
}
