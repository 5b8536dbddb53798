//! Common types used across edgesync components.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One artifact to reconcile between the host and the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTarget {
    /// File on the host.
    pub local_path: PathBuf,
    /// Absolute destination path on the device.
    pub remote_path: String,
}

impl TransferTarget {
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        }
    }

    /// Parent directory of the remote path, if it has one.
    ///
    /// `/a/b/c.bin` yields `/a/b`; `/c.bin` yields `/`; `c.bin` yields `None`.
    pub fn remote_parent(&self) -> Option<&str> {
        remote_parent(&self.remote_path)
    }

    /// File name used in log lines and progress bars.
    pub fn display_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.local_path.display().to_string())
    }
}

pub(crate) fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// Join a relative remote path onto a base directory.
///
/// Absolute paths are returned unchanged.
pub fn resolve_remote_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches("./"))
    }
}

/// Remote path for a local file dropped into a remote directory.
pub fn remote_path_in_dir(dir: &str, local: &Path) -> String {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    resolve_remote_path(dir, &name)
}

/// Why an upload was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Sizes match and the digest check is disabled.
    SizeMatch,
    /// Both sides are empty files.
    EmptyFile,
    /// Sizes match and the file is above the integrity ceiling.
    AboveCeiling,
    /// Sizes and digests match.
    DigestMatch,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SizeMatch => write!(f, "size matches"),
            Self::EmptyFile => write!(f, "empty file"),
            Self::AboveCeiling => write!(f, "size matches, above integrity ceiling"),
            Self::DigestMatch => write!(f, "digest matches"),
        }
    }
}

/// Successful result of syncing one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The file was uploaded.
    Transferred { bytes: u64 },
    /// The device already had identical content.
    Skipped { reason: SkipReason },
}

impl SyncOutcome {
    pub fn transferred(&self) -> bool {
        matches!(self, Self::Transferred { .. })
    }

    pub fn bytes_sent(&self) -> u64 {
        match self {
            Self::Transferred { bytes } => *bytes,
            Self::Skipped { .. } => 0,
        }
    }
}

/// Result for one target of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    pub target: TransferTarget,
    #[serde(flatten)]
    pub status: TargetStatus,
}

/// Success or failure of one target, in a serializable form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    Ok(SyncOutcome),
    Failed { code: String, error: String },
    /// Not attempted because the session died on an earlier target.
    Aborted,
}

impl TargetResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, TargetStatus::Ok(_))
    }
}

/// Per-target results of a batch sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub results: Vec<TargetResult>,
}

impl SyncReport {
    pub fn transferred(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(&r.status, TargetStatus::Ok(o) if o.transferred()))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(&r.status, TargetStatus::Ok(o) if !o.transferred()))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.results
            .iter()
            .map(|r| match &r.status {
                TargetStatus::Ok(o) => o.bytes_sent(),
                _ => 0,
            })
            .sum()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_parent() {
        assert_eq!(remote_parent("/a/b/c.bin"), Some("/a/b"));
        assert_eq!(remote_parent("/c.bin"), Some("/"));
        assert_eq!(remote_parent("c.bin"), None);
        assert_eq!(remote_parent("/a/b/"), Some("/a"));
    }

    #[test]
    fn test_resolve_remote_path() {
        assert_eq!(
            resolve_remote_path("/home/ubuntu/deploy/", "assets/model.onnx"),
            "/home/ubuntu/deploy/assets/model.onnx"
        );
        assert_eq!(
            resolve_remote_path("/home/ubuntu/deploy", "./run.sh"),
            "/home/ubuntu/deploy/run.sh"
        );
        assert_eq!(resolve_remote_path("/base", "/opt/lib.so"), "/opt/lib.so");
    }

    #[test]
    fn test_remote_path_in_dir() {
        let path = remote_path_in_dir("/deploy/lib", Path::new("build/libQnnCpu.so"));
        assert_eq!(path, "/deploy/lib/libQnnCpu.so");
    }

    #[test]
    fn test_report_counts() {
        let target = TransferTarget::new("a", "/r/a");
        let report = SyncReport {
            results: vec![
                TargetResult {
                    target: target.clone(),
                    status: TargetStatus::Ok(SyncOutcome::Transferred { bytes: 10 }),
                },
                TargetResult {
                    target: target.clone(),
                    status: TargetStatus::Ok(SyncOutcome::Skipped {
                        reason: SkipReason::DigestMatch,
                    }),
                },
                TargetResult {
                    target,
                    status: TargetStatus::Failed {
                        code: "ES-E402".into(),
                        error: "missing".into(),
                    },
                },
            ],
        };
        assert_eq!(report.transferred(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.bytes_sent(), 10);
        assert!(!report.all_succeeded());
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_string(&SyncOutcome::Skipped {
            reason: SkipReason::AboveCeiling,
        })
        .unwrap();
        assert_eq!(json, r#"{"outcome":"skipped","reason":"above_ceiling"}"#);
    }
}
