//! `edgesync deploy`: packages, artifacts, then the manifest's steps.
//!
//! Packages are packed into a staging directory that lives for the rest
//! of the run. Every package whose archive is present on the device gets
//! an extraction step in front of the manifest's steps. The step itself
//! checks the stamp left by the last extraction and does nothing when it
//! names the same archive.

use super::helpers::{format_bytes, print_json, print_plan_report, print_sync_report};
use crate::ui::TransferBars;
use anyhow::{Context, Result};
use edgesync_common::package::{PackagedDirectory, package_all};
use edgesync_common::types::TargetStatus;
use edgesync_common::{
    CommandChannel, EdgeSyncConfig, PlanReport, RemoteStep, SyncReport, TimingSummary,
    TransferChannel, TransferTarget, sync_batch,
};
use serde::Serialize;
use tracing::info;

/// Everything `deploy` did, for `--json`.
#[derive(Debug, Serialize)]
pub struct DeployReport {
    pub sync: SyncReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingSummary>,
}

impl DeployReport {
    pub fn succeeded(&self) -> bool {
        self.sync.all_succeeded() && self.plan.as_ref().is_none_or(|p| p.succeeded)
    }
}

pub async fn run<C>(
    session: &mut C,
    config: &EdgeSyncConfig,
    skip_steps: bool,
    json: bool,
) -> Result<bool>
where
    C: CommandChannel + TransferChannel,
{
    let staging = tempfile::Builder::new()
        .prefix("edgesync-")
        .tempdir()
        .context("failed to create staging directory")?;
    let packages = package_all(&config.package_specs(), staging.path())
        .await
        .context("failed to pack directories")?;
    for packed in &packages {
        info!(
            archive = %packed.archive.display(),
            size = %format_bytes(packed.bytes),
            "packed"
        );
    }

    let base = config.device.remote_base.as_str();
    let mut targets: Vec<TransferTarget> = packages.iter().map(|p| p.target(base)).collect();
    targets.extend(config.artifact_targets());

    let bars = TransferBars::new(json);
    let sync = sync_batch(session, &targets, &config.sync_policy(), |t| bars.for_target(t)).await;

    let plan = if skip_steps || !sync.all_succeeded() {
        None
    } else {
        let prelude = extraction_steps(&packages, &sync, base);
        if prelude.is_empty() && config.steps.is_empty() {
            None
        } else {
            let plan = config
                .plan_with_prelude(prelude)
                .context("invalid remote plan")?;
            Some(plan.run(session).await.context("remote plan aborted")?)
        }
    };

    let timing = plan.as_ref().and_then(PlanReport::timing_summary);
    let report = DeployReport { sync, plan, timing };

    if json {
        print_json(&report)?;
    } else {
        print_sync_report(&report.sync);
        if let Some(plan) = &report.plan {
            print_plan_report(plan);
        } else if !report.sync.all_succeeded() && (!packages.is_empty() || !config.steps.is_empty()) {
            println!("steps not run: sync had failures");
        }
        if let Some(timing) = &report.timing {
            println!("timing: {timing}");
        }
    }

    staging.close().context("failed to remove staging directory")?;
    Ok(report.succeeded())
}

/// Extraction steps for every package whose archive synced, uploaded or not.
fn extraction_steps(packages: &[PackagedDirectory], sync: &SyncReport, base: &str) -> Vec<RemoteStep> {
    packages
        .iter()
        .filter(|p| {
            let archive = p.spec.remote_archive_path(base);
            sync.results
                .iter()
                .any(|r| r.target.remote_path == archive && matches!(r.status, TargetStatus::Ok(_)))
        })
        .map(|p| p.spec.extraction_step(base))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgesync_common::mock::MockDevice;
    use edgesync_common::package::PackageSpec;
    use edgesync_common::types::TargetResult;
    use edgesync_common::{CommandResult, SkipReason, SyncOutcome};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn packed(name: &str) -> PackagedDirectory {
        PackagedDirectory {
            spec: PackageSpec {
                source: PathBuf::from(format!("/src/{name}")),
                entries: Vec::new(),
                remote_dir: name.to_string(),
                archive_name: None,
            },
            archive: PathBuf::from(format!("/tmp/stage/{name}.tar.gz")),
            bytes: 10,
        }
    }

    fn result(remote: &str, status: TargetStatus) -> TargetResult {
        TargetResult {
            target: TransferTarget::new("x", remote),
            status,
        }
    }

    /// A project with one SDK package, one artifact and one step.
    fn project(root: &Path) -> EdgeSyncConfig {
        std::fs::create_dir_all(root.join("sdk/lib")).unwrap();
        std::fs::write(root.join("sdk/lib/libBackend.so"), vec![7u8; 2048]).unwrap();
        std::fs::write(root.join("model.onnx"), vec![1u8; 512]).unwrap();
        let manifest = root.join("edgesync.toml");
        std::fs::write(
            &manifest,
            r#"
[device]
host = "rb5.local"
remote_base = "/home/ubuntu/deploy"

[[artifact]]
local = "model.onnx"
remote = "models/model.onnx"

[[package]]
source = "sdk"
remote_dir = "sdk"

[[step]]
name = "bench"
command = "./run.sh"
"#,
        )
        .unwrap();
        EdgeSyncConfig::from_file(&manifest).unwrap()
    }

    fn extractions(device: &MockDevice) -> usize {
        device
            .commands()
            .iter()
            .filter(|c| c.contains("tar -xzf /home/ubuntu/deploy/sdk.tar.gz"))
            .count()
    }

    #[test]
    fn test_every_synced_archive_is_extracted() {
        let packages = vec![packed("lib"), packed("include"), packed("dsp")];
        let sync = SyncReport {
            results: vec![
                result(
                    "/d/lib.tar.gz",
                    TargetStatus::Ok(SyncOutcome::Transferred { bytes: 10 }),
                ),
                result(
                    "/d/include.tar.gz",
                    TargetStatus::Ok(SyncOutcome::Skipped {
                        reason: SkipReason::DigestMatch,
                    }),
                ),
                result(
                    "/d/dsp.tar.gz",
                    TargetStatus::Failed {
                        code: "ES-E403".into(),
                        error: "upload failed".into(),
                    },
                ),
            ],
        };

        let steps = extraction_steps(&packages, &sync, "/d");

        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["extract lib.tar.gz", "extract include.tar.gz"]);
        assert!(steps[0].command.contains("-C /d/lib"));
    }

    #[test]
    fn test_report_fails_when_plan_fails() {
        let report = DeployReport {
            sync: SyncReport::default(),
            plan: Some(PlanReport {
                plan: "deploy".into(),
                steps: Vec::new(),
                succeeded: false,
            }),
            timing: None,
        };
        assert!(!report.succeeded());

        let report = DeployReport {
            sync: SyncReport::default(),
            plan: None,
            timing: None,
        };
        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn test_deploy_twice_uploads_once_and_keeps_extraction_in_plan() {
        let dir = TempDir::new().unwrap();
        let config = project(dir.path());
        let mut device = MockDevice::new();

        assert!(run(&mut device, &config, false, true).await.unwrap());
        assert_eq!(device.uploads().len(), 2);
        assert_eq!(extractions(&device), 1);
        assert_eq!(device.count_commands_starting_with("cd /home/ubuntu/deploy && ./run.sh"), 1);

        device.clear_log();
        assert!(run(&mut device, &config, false, true).await.unwrap());
        assert!(device.uploads().is_empty());
        // The device-side stamp decides whether tar actually runs.
        assert_eq!(extractions(&device), 1);
        assert!(device.commands().iter().any(|c| c.contains(".edgesync-extracted")));
    }

    #[tokio::test]
    async fn test_archive_from_failed_run_is_extracted_on_rerun() {
        let dir = TempDir::new().unwrap();
        let config = project(dir.path());
        std::fs::remove_file(dir.path().join("model.onnx")).unwrap();
        let mut device = MockDevice::new();

        assert!(!run(&mut device, &config, false, true).await.unwrap());
        assert_eq!(device.uploads().len(), 1, "archive still uploads");
        assert_eq!(extractions(&device), 0, "plan skipped after a failed target");

        std::fs::write(dir.path().join("model.onnx"), vec![1u8; 512]).unwrap();
        device.clear_log();
        assert!(run(&mut device, &config, false, true).await.unwrap());
        assert_eq!(device.uploads().len(), 1);
        assert_eq!(device.uploads()[0].remote_path, "/home/ubuntu/deploy/models/model.onnx");
        assert_eq!(extractions(&device), 1);
    }

    #[tokio::test]
    async fn test_skip_steps_then_deploy_extracts() {
        let dir = TempDir::new().unwrap();
        let config = project(dir.path());
        let mut device = MockDevice::new();

        assert!(run(&mut device, &config, true, true).await.unwrap());
        assert_eq!(extractions(&device), 0);

        device.clear_log();
        assert!(run(&mut device, &config, false, true).await.unwrap());
        assert!(device.uploads().is_empty());
        assert_eq!(extractions(&device), 1);
    }

    #[tokio::test]
    async fn test_failed_extraction_is_retried_next_run() {
        let dir = TempDir::new().unwrap();
        let config = project(dir.path());
        let mut device = MockDevice::new();
        device.respond_when_contains("tar -xzf", CommandResult::failed(2, "tar: write error"));

        assert!(!run(&mut device, &config, false, true).await.unwrap());
        assert_eq!(device.count_commands_starting_with("cd /home/ubuntu/deploy && ./run.sh"), 0);

        let mut healthy = MockDevice::new();
        for path in device.file_paths() {
            healthy.put_file(&path, device.file(&path).unwrap().to_vec());
        }
        assert!(run(&mut healthy, &config, false, true).await.unwrap());
        assert!(healthy.uploads().is_empty());
        assert_eq!(extractions(&healthy), 1);
        assert_eq!(healthy.count_commands_starting_with("cd /home/ubuntu/deploy && ./run.sh"), 1);
    }
}
