//! `edgesync sync`: one file, one target.

use super::helpers::{print_json, print_sync_report};
use crate::ui::TransferBars;
use anyhow::Result;
use edgesync_common::types::remote_path_in_dir;
use edgesync_common::{CommandChannel, EdgeSyncConfig, TransferChannel, TransferTarget, sync_batch};
use std::path::Path;

pub async fn run<C>(
    session: &mut C,
    config: &EdgeSyncConfig,
    local: &Path,
    remote: &str,
    no_verify: bool,
    json: bool,
) -> Result<bool>
where
    C: CommandChannel + TransferChannel,
{
    let target = TransferTarget::new(local, remote_destination(config, local, remote));
    let mut policy = config.sync_policy();
    if no_verify {
        policy = policy.with_verify_integrity(false);
    }

    let bars = TransferBars::new(json);
    let report = sync_batch(session, std::slice::from_ref(&target), &policy, |t| {
        bars.for_target(t)
    })
    .await;

    if json {
        print_json(&report)?;
    } else {
        print_sync_report(&report);
    }
    Ok(report.all_succeeded())
}

/// Remote path for `local` given the `remote` argument.
///
/// A trailing `/` names a directory and keeps the local file name.
fn remote_destination(config: &EdgeSyncConfig, local: &Path, remote: &str) -> String {
    if remote.ends_with('/') {
        let dir = remote.trim_end_matches('/');
        let dir = if dir.is_empty() && remote.starts_with('/') {
            "/"
        } else {
            dir
        };
        remote_path_in_dir(&config.resolve_remote(dir), local)
    } else {
        config.resolve_remote(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgesync_common::mock::MockDevice;

    fn config() -> EdgeSyncConfig {
        let mut config = EdgeSyncConfig::default();
        config.device.host = "rb5.local".to_string();
        config.device.remote_base = "/home/ubuntu/deploy".to_string();
        config
    }

    #[test]
    fn test_remote_destination() {
        let config = config();
        let local = Path::new("build/model.onnx");
        assert_eq!(
            remote_destination(&config, local, "models/m.onnx"),
            "/home/ubuntu/deploy/models/m.onnx"
        );
        assert_eq!(
            remote_destination(&config, local, "models/"),
            "/home/ubuntu/deploy/models/model.onnx"
        );
        assert_eq!(remote_destination(&config, local, "/tmp/"), "/tmp/model.onnx");
        assert_eq!(remote_destination(&config, local, "/"), "/model.onnx");
    }

    #[tokio::test]
    async fn test_sync_uploads_then_skips() {
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("model.onnx");
        std::fs::write(&local, vec![3u8; 700]).unwrap();
        let config = config();
        let mut device = MockDevice::new();

        assert!(run(&mut device, &config, &local, "models/", false, true).await.unwrap());
        assert_eq!(device.file("/home/ubuntu/deploy/models/model.onnx"), Some(&[3u8; 700][..]));

        device.clear_log();
        assert!(run(&mut device, &config, &local, "models/", false, true).await.unwrap());
        assert!(device.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_missing_local_file_fails_the_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut device = MockDevice::new();
        let ok = run(&mut device, &config(), &dir.path().join("nope.bin"), "x.bin", false, true)
            .await
            .unwrap();
        assert!(!ok);
        assert!(device.commands().is_empty());
    }
}
