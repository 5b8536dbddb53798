//! Incremental artifact sync.
//!
//! For each target the device is asked for the file size first. Only when
//! the sizes agree, integrity checking is on, and the file is non-empty and
//! at most `integrity_ceiling` bytes does the check escalate to a content
//! digest on both ends. Any probe that fails or prints garbage means
//! "unknown" and forces a transfer. Nothing is cached between calls.

use crate::config::SyncSettings;
use crate::digest::{DEFAULT_CHUNK_SIZE, DigestAlgorithm, digest_file};
use crate::errors::{ChannelError, SyncError};
use crate::remote::{CommandChannel, TransferChannel, TransferProgress, probe};
use crate::types::{SkipReason, SyncOutcome, SyncReport, TargetResult, TargetStatus, TransferTarget};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Default integrity ceiling: 256 MiB.
pub const DEFAULT_INTEGRITY_CEILING: u64 = 256 * 1024 * 1024;

/// Knobs for [`sync_artifact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Compare digests when sizes match.
    pub verify_integrity: bool,
    /// Files larger than this skip the digest and trust the size.
    pub integrity_ceiling: u64,
    /// Read size for local hashing.
    pub chunk_size: usize,
    pub digest: DigestAlgorithm,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            verify_integrity: true,
            integrity_ceiling: DEFAULT_INTEGRITY_CEILING,
            chunk_size: DEFAULT_CHUNK_SIZE,
            digest: DigestAlgorithm::default(),
        }
    }
}

impl SyncPolicy {
    pub fn with_verify_integrity(mut self, verify: bool) -> Self {
        self.verify_integrity = verify;
        self
    }

    pub fn with_integrity_ceiling(mut self, ceiling: u64) -> Self {
        self.integrity_ceiling = ceiling;
        self
    }

    /// Why a same-size file can be skipped without hashing, if it can.
    fn skip_without_digest(&self, size: u64) -> Option<SkipReason> {
        if !self.verify_integrity {
            Some(SkipReason::SizeMatch)
        } else if size == 0 {
            Some(SkipReason::EmptyFile)
        } else if size > self.integrity_ceiling {
            Some(SkipReason::AboveCeiling)
        } else {
            None
        }
    }
}

impl From<&SyncSettings> for SyncPolicy {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            verify_integrity: settings.verify_integrity,
            integrity_ceiling: settings.integrity_ceiling_bytes,
            chunk_size: settings.chunk_size,
            digest: settings.digest,
        }
    }
}

/// Make `target.remote_path` hold the same bytes as `target.local_path`.
///
/// Returns whether the upload happened and why it was skipped otherwise.
/// A missing local file fails without touching the transfer channel.
pub async fn sync_artifact<C>(
    channel: &mut C,
    target: &TransferTarget,
    policy: &SyncPolicy,
    progress: &mut dyn FnMut(TransferProgress),
) -> Result<SyncOutcome, SyncError>
where
    C: CommandChannel + TransferChannel,
{
    let local = target.local_path.as_path();
    let remote = target.remote_path.as_str();

    let local_size = match tokio::fs::metadata(local).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            warn!(path = %local.display(), "local artifact is not a regular file");
            return Err(SyncError::NotFound {
                path: local.to_path_buf(),
            });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %local.display(), "local artifact not found, skipping");
            return Err(SyncError::NotFound {
                path: local.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(SyncError::LocalIo {
                path: local.to_path_buf(),
                source,
            });
        }
    };

    let remote_size = match probe::remote_size(channel, remote).await {
        Ok(size) => size,
        Err(e) => {
            warn!(remote_path = remote, error = %e, "size probe failed, forcing transfer");
            None
        }
    };

    match remote_size {
        None => {
            debug!(remote_path = remote, "remote size unknown");
        }
        Some(size) if size != local_size => {
            info!(
                artifact = %target.display_name(),
                local = local_size,
                remote = size,
                "size mismatch"
            );
        }
        Some(_) => {
            if let Some(reason) = policy.skip_without_digest(local_size) {
                info!(artifact = %target.display_name(), %reason, "skipping upload");
                return Ok(SyncOutcome::Skipped { reason });
            }
            if digests_match(channel, local, remote, policy).await? {
                info!(
                    artifact = %target.display_name(),
                    reason = %SkipReason::DigestMatch,
                    "skipping upload"
                );
                return Ok(SyncOutcome::Skipped {
                    reason: SkipReason::DigestMatch,
                });
            }
            info!(artifact = %target.display_name(), "digest mismatch");
        }
    }

    if let Some(parent) = target.remote_parent() {
        ensure_parent(channel, target, parent).await?;
    }

    info!(
        artifact = %target.display_name(),
        bytes = local_size,
        remote_path = remote,
        "uploading"
    );
    let bytes = channel
        .upload(local, remote, progress)
        .await
        .map_err(|source| SyncError::Transfer {
            local_path: local.to_path_buf(),
            remote_path: remote.to_string(),
            source,
        })?;
    Ok(SyncOutcome::Transferred { bytes })
}

async fn digests_match<C: CommandChannel>(
    channel: &mut C,
    local: &Path,
    remote: &str,
    policy: &SyncPolicy,
) -> Result<bool, SyncError> {
    let remote_digest = match probe::remote_digest(channel, policy.digest, remote).await {
        Ok(Some(d)) => d,
        Ok(None) => {
            warn!(remote_path = remote, "remote digest unavailable, forcing transfer");
            return Ok(false);
        }
        Err(e) => {
            warn!(remote_path = remote, error = %e, "digest probe failed, forcing transfer");
            return Ok(false);
        }
    };

    let path = local.to_path_buf();
    let algorithm = policy.digest;
    let chunk_size = policy.chunk_size;
    let local_digest = tokio::task::spawn_blocking(move || digest_file(algorithm, &path, chunk_size))
        .await
        .map_err(|e| SyncError::LocalIo {
            path: local.to_path_buf(),
            source: std::io::Error::other(e),
        })?
        .map_err(|source| SyncError::LocalIo {
            path: local.to_path_buf(),
            source,
        })?;

    debug!(%local_digest, %remote_digest, "compared digests");
    Ok(local_digest == remote_digest)
}

async fn ensure_parent<C: CommandChannel>(
    channel: &mut C,
    target: &TransferTarget,
    parent: &str,
) -> Result<(), SyncError> {
    match probe::ensure_remote_dir(channel, parent).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(message)) => Err(SyncError::RemoteDir {
            dir: parent.to_string(),
            message,
        }),
        Err(source @ (ChannelError::Closed | ChannelError::Connect { .. })) => {
            Err(SyncError::Transfer {
                local_path: target.local_path.clone(),
                remote_path: target.remote_path.clone(),
                source,
            })
        }
        Err(e) => Err(SyncError::RemoteDir {
            dir: parent.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Sync every target in order, continuing past per-target failures.
///
/// Only a dead session stops the batch; the remaining targets are then
/// reported as aborted.
pub async fn sync_batch<C, F>(
    channel: &mut C,
    targets: &[TransferTarget],
    policy: &SyncPolicy,
    mut progress_for: F,
) -> SyncReport
where
    C: CommandChannel + TransferChannel,
    F: FnMut(&TransferTarget) -> Box<dyn FnMut(TransferProgress)>,
{
    let mut report = SyncReport::default();
    let mut session_dead = false;

    for target in targets {
        if session_dead {
            report.results.push(TargetResult {
                target: target.clone(),
                status: TargetStatus::Aborted,
            });
            continue;
        }

        let mut progress = progress_for(target);
        let status = match sync_artifact(channel, target, policy, progress.as_mut()).await {
            Ok(outcome) => TargetStatus::Ok(outcome),
            Err(err) => {
                if err.is_session_fatal() {
                    warn!(error = %err, "session lost, aborting remaining targets");
                    session_dead = true;
                } else if !matches!(err, SyncError::NotFound { .. }) {
                    warn!(code = err.code(), error = %err, "artifact failed");
                }
                TargetStatus::Failed {
                    code: err.code().to_string(),
                    error: err.to_string(),
                }
            }
        };
        report.results.push(TargetResult {
            target: target.clone(),
            status,
        });
    }

    info!(
        transferred = report.transferred(),
        skipped = report.skipped(),
        failed = report.failed(),
        bytes = report.bytes_sent(),
        "sync finished"
    );
    report
}
