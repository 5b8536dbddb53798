//! Command and transfer channels to the device.
//!
//! Everything that touches the device goes through two seams:
//!
//! - [`CommandChannel`]: run a shell string, get exit code and output back.
//! - [`TransferChannel`]: stream a whole file to (or from) a remote path.
//!
//! Production code uses [`ssh::SshSession`], which layers both on a single
//! multiplexed SSH connection. Tests use [`crate::mock::MockDevice`].
//!
//! Channels take `&mut self`: a session belongs to exactly one top-level
//! invocation and only one command or transfer is in flight at a time.

pub mod probe;
pub mod shell;
#[cfg(unix)]
pub mod ssh;

use crate::errors::ChannelError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use probe::{ensure_remote_dir, locate, remote_digest, remote_file_exists, remote_size};

/// Result of a remote command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status; `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall time of the round trip.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }
}

/// Incremental progress of a streamed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.bytes_sent as f64 / self.total_bytes as f64
        }
    }
}

/// Runs shell commands on the device.
#[allow(async_fn_in_trait)]
pub trait CommandChannel {
    /// Run `command` through the remote login shell and wait for it to exit.
    ///
    /// A nonzero exit is `Ok`; `Err` means the channel itself broke.
    async fn execute(&mut self, command: &str) -> Result<CommandResult, ChannelError>;
}

/// Moves whole files between host and device.
#[allow(async_fn_in_trait)]
pub trait TransferChannel {
    /// Copy `local` to `remote_path`, returning the number of bytes sent.
    ///
    /// Implementations must be atomic: on error, `remote_path` either still
    /// holds its previous content or does not exist.
    async fn upload(
        &mut self,
        local: &Path,
        remote_path: &str,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<u64, ChannelError>;

    /// Copy `remote_path` to `local`, returning the number of bytes received.
    async fn download(
        &mut self,
        remote_path: &str,
        local: &Path,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<u64, ChannelError>;
}

/// Progress callback that discards updates.
pub fn no_progress() -> impl FnMut(TransferProgress) {
    |_| {}
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
