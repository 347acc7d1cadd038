//! Backup/restore state machine: single active instance per type, persisted
//! records, progress visibility.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{client_with, fixture_with, standard_node};

use argus_core::backup::{BackupParams, RestoreParams, TransferStatus, TransferStore};
use argus_core::test_helpers::GatedExecutor;

fn backup_params() -> BackupParams {
    BackupParams {
        namespace: "test".into(),
        destination_address: "10.0.0.50:22".into(),
        destination_path: "/backups/test".into(),
        username: "op".into(),
        password: "secret".into(),
        sets: String::new(),
        metadata_only: false,
        terminate_on_change: false,
        scan_priority: 2,
    }
}

fn restore_params() -> RestoreParams {
    RestoreParams {
        namespace: "test".into(),
        destination_address: "10.0.0.50:22".into(),
        destination_path: "/backups/test".into(),
        username: "op".into(),
        password: "secret".into(),
        threads: 4,
        missing_records_only: false,
        ignore_generation_num: false,
    }
}

async fn wait_for_status(check: impl Fn() -> TransferStatus, wanted: TransferStatus) {
    for _ in 0..200 {
        if check() == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transfer never reached {:?}", wanted);
}

#[tokio::test]
async fn second_backup_rejected_while_first_in_progress() {
    let gate = GatedExecutor::new();
    let fx = fixture_with(gate.clone(), 0);
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let cluster = fx.register(client_with(&[n1]), false).await;

    let first = cluster.start_backup(backup_params()).await.unwrap();
    assert_eq!(first.status(), TransferStatus::InProgress);

    // A concurrent start fails and leaves the active handle untouched.
    let err = cluster.start_backup(backup_params()).await.unwrap_err();
    assert!(err.to_string().contains("already exists and is in progress"));
    assert_eq!(cluster.current_backup().unwrap().id, first.id);

    // Release the worker; the job completes and a new backup may start.
    gate.release_one();
    let job = Arc::clone(&first);
    wait_for_status(move || job.status(), TransferStatus::Ok).await;

    let second = cluster.start_backup(backup_params()).await.unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(cluster.current_backup().unwrap().id, second.id);
    gate.release_one();
}

#[tokio::test]
async fn completed_backups_land_in_the_ledger() {
    let gate = GatedExecutor::new();
    let fx = fixture_with(gate.clone(), 0);
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let cluster = fx.register(client_with(&[n1]), false).await;

    let backup = cluster.start_backup(backup_params()).await.unwrap();
    gate.release_one();
    let job = Arc::clone(&backup);
    wait_for_status(move || job.status(), TransferStatus::Ok).await;

    // Re-read the ledger the way the API endpoint does.
    let store = TransferStore::new(fx.data_dir.path());
    let mut successful = Vec::new();
    for _ in 0..200 {
        successful = store.successful_backups(&cluster.id()).await.unwrap();
        if !successful.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(successful.len(), 1);
    assert_eq!(successful[0].id, backup.id);
    assert_eq!(successful[0].status, TransferStatus::Ok);
}

#[tokio::test]
async fn restores_run_their_own_state_machine() {
    let gate = GatedExecutor::new();
    let fx = fixture_with(gate.clone(), 0);
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let cluster = fx.register(client_with(&[n1]), false).await;

    let restore = cluster.start_restore(restore_params()).await.unwrap();
    assert_eq!(restore.status(), TransferStatus::InProgress);

    let err = cluster.start_restore(restore_params()).await.unwrap_err();
    assert!(err.to_string().contains("already exists and is in progress"));

    // An in-progress restore does not block a backup.
    let backup = cluster.start_backup(backup_params()).await.unwrap();
    assert_eq!(backup.status(), TransferStatus::InProgress);

    gate.release_one();
    gate.release_one();
    let job = Arc::clone(&restore);
    wait_for_status(move || job.status(), TransferStatus::Ok).await;
}
