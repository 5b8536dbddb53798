//! `edgesync fetch`: pull a result file back from the device.

use super::helpers::{format_bytes, print_json};
use crate::ui::TransferBars;
use anyhow::{Context, Result};
use edgesync_common::{EdgeSyncConfig, TransferChannel};
use std::path::Path;

pub async fn run<C: TransferChannel>(
    session: &mut C,
    config: &EdgeSyncConfig,
    remote: &str,
    local: &Path,
    json: bool,
) -> Result<bool> {
    let remote_path = config.resolve_remote(remote);
    let bars = TransferBars::new(json);
    let mut progress = bars.callback(remote_path.clone());

    let bytes = session
        .download(&remote_path, local, progress.as_mut())
        .await
        .with_context(|| format!("failed to fetch {remote_path}"))?;

    if json {
        print_json(&serde_json::json!({
            "remote_path": remote_path,
            "local_path": local,
            "bytes": bytes,
        }))?;
    } else {
        println!("fetched {remote_path} -> {} ({})", local.display(), format_bytes(bytes));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgesync_common::mock::MockDevice;

    #[tokio::test]
    async fn test_fetch_resolves_against_remote_base() {
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("out.json");
        let mut config = EdgeSyncConfig::default();
        config.device.remote_base = "/home/ubuntu/deploy".to_string();
        let mut device = MockDevice::new();
        device.put_file("/home/ubuntu/deploy/results/out.json", b"{\"ms\":11.5}".to_vec());

        assert!(run(&mut device, &config, "results/out.json", &local, true).await.unwrap());
        assert_eq!(std::fs::read(&local).unwrap(), b"{\"ms\":11.5}");
        assert_eq!(device.downloads(), ["/home/ubuntu/deploy/results/out.json"]);
    }

    #[tokio::test]
    async fn test_missing_remote_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = EdgeSyncConfig::default();
        config.device.remote_base = "/d".to_string();
        let mut device = MockDevice::new();

        let err = run(&mut device, &config, "nope.json", &dir.path().join("x"), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/d/nope.json"));
    }
}
