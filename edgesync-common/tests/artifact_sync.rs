//! End-to-end artifact sync scenarios against the in-memory device.
//!
//! Sizes are scaled down: a ceiling of a few KiB stands in for the
//! hundreds of MiB a real model would carry.

use edgesync_common::mock::MockDevice;
use edgesync_common::remote::{TransferProgress, no_progress};
use edgesync_common::testing::{TestLogger, TestPhase};
use edgesync_common::types::TargetStatus;
use edgesync_common::{SkipReason, SyncOutcome, SyncPolicy, SyncError, TransferTarget, sync_artifact, sync_batch};
use std::path::PathBuf;
use tempfile::TempDir;

const CEILING: u64 = 4 * 1024;

fn write_local(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

fn policy() -> SyncPolicy {
    SyncPolicy::default().with_integrity_ceiling(CEILING)
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

async fn sync_once(device: &mut MockDevice, target: &TransferTarget) -> Result<SyncOutcome, SyncError> {
    sync_artifact(device, target, &policy(), &mut no_progress()).await
}

#[tokio::test]
async fn e2e_sync_large_file_to_absent_remote() {
    let logger = TestLogger::for_test("e2e_sync_large_file_to_absent_remote");
    let dir = TempDir::new().unwrap();
    let local = write_local(&dir, "weights.bin", &pattern(10 * 1024, 7));
    let target = TransferTarget::new(&local, "/home/ubuntu/deploy/models/weights.bin");
    let mut device = MockDevice::new();

    logger.log(TestPhase::Execute, "syncing to empty device");
    let outcome = sync_once(&mut device, &target).await.unwrap();

    assert_eq!(outcome, SyncOutcome::Transferred { bytes: 10 * 1024 });
    assert_eq!(device.count_commands_starting_with("mkdir -p"), 1);
    assert_eq!(device.uploads().len(), 1);
    assert_eq!(device.digest_calls(), 0, "absent remote must not be hashed");
    assert!(device.has_dir("/home/ubuntu/deploy/models"));
    logger.pass();
}

#[tokio::test]
async fn e2e_sync_is_idempotent() {
    let logger = TestLogger::for_test("e2e_sync_is_idempotent");
    let dir = TempDir::new().unwrap();
    let targets = vec![
        TransferTarget::new(write_local(&dir, "weights.bin", &pattern(10 * 1024, 1)), "/d/weights.bin"),
        TransferTarget::new(write_local(&dir, "config.json", &pattern(200, 2)), "/d/config.json"),
        TransferTarget::new(write_local(&dir, "empty.txt", b""), "/d/empty.txt"),
    ];
    let mut device = MockDevice::new();

    let first = sync_batch(&mut device, &targets, &policy(), |_| Box::new(no_progress())).await;
    assert_eq!(first.transferred(), 3);

    device.clear_log();
    logger.log(TestPhase::Verify, "second run");
    let second = sync_batch(&mut device, &targets, &policy(), |_| Box::new(no_progress())).await;

    assert_eq!(second.transferred(), 0);
    assert_eq!(second.skipped(), 3);
    assert_eq!(second.bytes_sent(), 0);
    assert!(device.uploads().is_empty());
    logger.pass();
}

#[tokio::test]
async fn e2e_large_unchanged_file_skips_without_hashing() {
    let logger = TestLogger::for_test("e2e_large_unchanged_file_skips_without_hashing");
    let dir = TempDir::new().unwrap();
    let content = pattern(10 * 1024, 3);
    let local = write_local(&dir, "weights.bin", &content);
    let target = TransferTarget::new(&local, "/d/weights.bin");
    let mut device = MockDevice::new();
    device.put_file("/d/weights.bin", content);

    let outcome = sync_once(&mut device, &target).await.unwrap();

    assert_eq!(
        outcome,
        SyncOutcome::Skipped {
            reason: SkipReason::AboveCeiling
        }
    );
    assert_eq!(device.digest_calls(), 0);
    assert!(device.uploads().is_empty());
    logger.pass();
}

#[tokio::test]
async fn e2e_large_corrupted_same_size_file_is_not_detected() {
    let logger = TestLogger::for_test("e2e_large_corrupted_same_size_file_is_not_detected");
    let dir = TempDir::new().unwrap();
    let local = write_local(&dir, "weights.bin", &pattern(10 * 1024, 4));
    let target = TransferTarget::new(&local, "/d/weights.bin");
    let corrupted = vec![0u8; 10 * 1024];
    let mut device = MockDevice::new();
    device.put_file("/d/weights.bin", corrupted.clone());

    let outcome = sync_once(&mut device, &target).await.unwrap();

    // Above the ceiling only the size is compared.
    assert!(!outcome.transferred());
    assert_eq!(device.file("/d/weights.bin"), Some(corrupted.as_slice()));
    logger.pass();
}

#[tokio::test]
async fn e2e_small_unchanged_file_skips_on_digest_match() {
    let logger = TestLogger::for_test("e2e_small_unchanged_file_skips_on_digest_match");
    let dir = TempDir::new().unwrap();
    let content = pattern(200, 5);
    let local = write_local(&dir, "config.json", &content);
    let target = TransferTarget::new(&local, "/d/config.json");
    let mut device = MockDevice::new();
    device.put_file("/d/config.json", content);

    let outcome = sync_once(&mut device, &target).await.unwrap();

    assert_eq!(
        outcome,
        SyncOutcome::Skipped {
            reason: SkipReason::DigestMatch
        }
    );
    assert_eq!(device.digest_calls(), 1);
    assert!(device.uploads().is_empty());
    logger.pass();
}

#[tokio::test]
async fn e2e_small_file_changed_in_place_is_reuploaded() {
    let logger = TestLogger::for_test("e2e_small_file_changed_in_place_is_reuploaded");
    let dir = TempDir::new().unwrap();
    let local = write_local(&dir, "config.json", &pattern(200, 6));
    let target = TransferTarget::new(&local, "/d/config.json");
    let mut device = MockDevice::new();

    assert!(sync_once(&mut device, &target).await.unwrap().transferred());

    let edited = pattern(200, 9);
    std::fs::write(&local, &edited).unwrap();
    device.clear_log();
    logger.log(TestPhase::Execute, "resync after same-size edit");
    let outcome = sync_once(&mut device, &target).await.unwrap();

    assert_eq!(outcome, SyncOutcome::Transferred { bytes: 200 });
    assert_eq!(device.digest_calls(), 1);
    assert_eq!(device.file("/d/config.json"), Some(edited.as_slice()));
    logger.pass();
}

#[tokio::test]
async fn e2e_size_mismatch_always_transfers() {
    let logger = TestLogger::for_test("e2e_size_mismatch_always_transfers");
    let dir = TempDir::new().unwrap();
    for (local_len, remote_len) in [(100usize, 99usize), (10 * 1024, 10 * 1024 + 1), (1, 0)] {
        let local = write_local(&dir, "model.onnx", &pattern(local_len, 1));
        let target = TransferTarget::new(&local, "/d/model.onnx");
        let mut device = MockDevice::new();
        device.put_file("/d/model.onnx", pattern(remote_len, 1));

        let outcome = sync_once(&mut device, &target).await.unwrap();

        assert!(outcome.transferred(), "local={local_len} remote={remote_len}");
        assert_eq!(device.digest_calls(), 0);
    }
    logger.pass();
}

#[tokio::test]
async fn e2e_missing_local_never_touches_transfer_channel() {
    let logger = TestLogger::for_test("e2e_missing_local_never_touches_transfer_channel");
    let dir = TempDir::new().unwrap();
    let present = write_local(&dir, "run.sh", b"#!/bin/sh\n./infer\n");
    let targets = vec![
        TransferTarget::new(dir.path().join("missing.bin"), "/d/missing.bin"),
        TransferTarget::new(&present, "/d/run.sh"),
    ];
    let mut device = MockDevice::new();

    let err = sync_once(&mut device, &targets[0]).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
    assert!(device.commands().is_empty());
    assert!(device.uploads().is_empty());

    let report = sync_batch(&mut device, &targets, &policy(), |_| Box::new(no_progress())).await;
    assert_eq!(report.failed(), 1);
    assert_eq!(report.transferred(), 1);
    match &report.results[0].status {
        TargetStatus::Failed { code, .. } => assert_eq!(code, "ES-E402"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(device.uploads().len(), 1);
    assert_eq!(device.uploads()[0].remote_path, "/d/run.sh");
    logger.pass();
}

#[tokio::test]
async fn e2e_unreadable_probe_forces_transfer() {
    let logger = TestLogger::for_test("e2e_unreadable_probe_forces_transfer");
    let dir = TempDir::new().unwrap();
    let content = pattern(200, 8);
    let local = write_local(&dir, "labels.txt", &content);
    let target = TransferTarget::new(&local, "/d/labels.txt");
    let mut device = MockDevice::new();
    device.put_file("/d/labels.txt", content);
    device.fail_commands_starting_with("stat ");

    let outcome = sync_once(&mut device, &target).await.unwrap();

    assert!(outcome.transferred());
    assert_eq!(device.digest_calls(), 0);
    logger.pass();
}

#[tokio::test]
async fn e2e_failed_upload_keeps_previous_remote_content() {
    let logger = TestLogger::for_test("e2e_failed_upload_keeps_previous_remote_content");
    let dir = TempDir::new().unwrap();
    let local = write_local(&dir, "weights.bin", &pattern(300 * 1024, 2));
    let target = TransferTarget::new(&local, "/d/weights.bin");
    let old = pattern(100, 0);
    let mut device = MockDevice::new();
    device.put_file("/d/weights.bin", old.clone());
    device.fail_uploads();

    let err = sync_once(&mut device, &target).await.unwrap_err();

    assert!(matches!(err, SyncError::Transfer { .. }));
    assert!(!err.is_session_fatal());
    assert_eq!(device.file("/d/weights.bin"), Some(old.as_slice()));
    logger.pass();
}

#[tokio::test]
async fn e2e_progress_reaches_total() {
    let logger = TestLogger::for_test("e2e_progress_reaches_total");
    let dir = TempDir::new().unwrap();
    let local = write_local(&dir, "weights.bin", &pattern(200 * 1024, 3));
    let target = TransferTarget::new(&local, "/d/weights.bin");
    let mut device = MockDevice::new();

    let mut updates = Vec::new();
    sync_artifact(&mut device, &target, &policy(), &mut |p: TransferProgress| updates.push(p))
        .await
        .unwrap();

    let last = updates.last().copied().unwrap();
    assert_eq!(last.bytes_sent, 200 * 1024);
    assert_eq!(last.total_bytes, 200 * 1024);
    assert!(updates.windows(2).all(|w| w[0].bytes_sent <= w[1].bytes_sent));
    logger.pass();
}
