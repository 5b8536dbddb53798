//! `openssh`-backed command and transfer channels.
//!
//! One [`SshSession`] wraps one multiplexed connection to the device.
//! Commands and uploads run as separate channels on it, one at a time.

use super::{CommandChannel, CommandResult, TransferChannel, TransferProgress, probe, shell};
use crate::config::DeviceConfig;
use crate::errors::ChannelError;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Read size for streaming uploads and downloads.
const STREAM_CHUNK: usize = 256 * 1024;

/// A live SSH session to the device.
pub struct SshSession {
    destination: String,
    session: Option<Session>,
}

impl SshSession {
    /// Open a session using key-based authentication.
    pub async fn connect(device: &DeviceConfig) -> Result<Self, ChannelError> {
        let destination = device.destination();
        let mut builder = SessionBuilder::default();
        builder
            .port(device.port)
            .connect_timeout(Duration::from_secs(device.connect_timeout_secs))
            .server_alive_interval(Duration::from_secs(device.keepalive_secs))
            .known_hosts_check(KnownHosts::Add);
        if let Some(user) = &device.user {
            builder.user(user.clone());
        }
        if let Some(key) = &device.identity_file {
            builder.keyfile(key);
        }

        debug!(%destination, port = device.port, "opening SSH session");
        let session = builder
            .connect(&device.host)
            .await
            .map_err(|e| ChannelError::Connect {
                destination: destination.clone(),
                message: e.to_string(),
            })?;
        info!(%destination, "connected");

        Ok(Self {
            destination,
            session: Some(session),
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Close the underlying connection. Calling it twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        debug!(destination = %self.destination, "closing SSH session");
        session.close().await.map_err(|e| ChannelError::Spawn {
            command: "<close>".to_string(),
            message: e.to_string(),
        })
    }

    fn session(&self) -> Result<&Session, ChannelError> {
        self.session.as_ref().ok_or(ChannelError::Closed)
    }

    async fn upload_inner(
        &self,
        local: &Path,
        remote_path: &str,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<u64, ChannelError> {
        let session = self.session()?;
        let local_io = |source| ChannelError::LocalIo {
            path: local.to_path_buf(),
            source,
        };
        let transfer = |message: String| ChannelError::Transfer {
            remote_path: remote_path.to_string(),
            message,
        };

        let mut file = tokio::fs::File::open(local).await.map_err(local_io)?;
        let total_bytes = file.metadata().await.map_err(local_io)?.len();

        let command = shell::receive_into(remote_path);
        debug!(%command, "starting upload");
        let mut child = session
            .raw_command(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .map_err(|e| map_spawn_error(&command, e))?;

        let mut stdin = child
            .stdin()
            .take()
            .ok_or_else(|| transfer("remote stdin was not captured".to_string()))?;

        let mut buf = vec![0u8; STREAM_CHUNK];
        let mut bytes_sent = 0u64;
        progress(TransferProgress {
            bytes_sent,
            total_bytes,
        });
        loop {
            let n = file.read(&mut buf).await.map_err(local_io)?;
            if n == 0 {
                break;
            }
            stdin
                .write_all(&buf[..n])
                .await
                .map_err(|e| transfer(format!("stream broke after {bytes_sent} bytes: {e}")))?;
            bytes_sent += n as u64;
            progress(TransferProgress {
                bytes_sent,
                total_bytes,
            });
        }
        stdin
            .shutdown()
            .await
            .map_err(|e| transfer(format!("failed to finish stream: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| map_spawn_error(&command, e))?;
        if !output.status.success() {
            return Err(transfer(format!(
                "remote writer exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(bytes_sent)
    }

    async fn download_inner(
        &self,
        remote_path: &str,
        partial: &Path,
        total_bytes: u64,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<u64, ChannelError> {
        let session = self.session()?;
        let local_io = |source| ChannelError::LocalIo {
            path: partial.to_path_buf(),
            source,
        };
        let transfer = |message: String| ChannelError::Transfer {
            remote_path: remote_path.to_string(),
            message,
        };

        let command = shell::send_file(remote_path);
        debug!(%command, "starting download");
        let mut child = session
            .raw_command(&command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .map_err(|e| map_spawn_error(&command, e))?;
        let mut stdout = child
            .stdout()
            .take()
            .ok_or_else(|| transfer("remote stdout was not captured".to_string()))?;

        let mut file = tokio::fs::File::create(partial).await.map_err(local_io)?;
        let mut buf = vec![0u8; STREAM_CHUNK];
        let mut received = 0u64;
        loop {
            let n = stdout
                .read(&mut buf)
                .await
                .map_err(|e| transfer(format!("stream broke after {received} bytes: {e}")))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await.map_err(local_io)?;
            received += n as u64;
            progress(TransferProgress {
                bytes_sent: received,
                total_bytes: total_bytes.max(received),
            });
        }
        file.flush().await.map_err(local_io)?;
        file.sync_all().await.map_err(local_io)?;
        drop(stdout);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| map_spawn_error(&command, e))?;
        if !output.status.success() {
            return Err(transfer(format!(
                "remote reader exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(received)
    }
}

impl CommandChannel for SshSession {
    async fn execute(&mut self, command: &str) -> Result<CommandResult, ChannelError> {
        let session = self.session()?;
        debug!(%command, "exec");
        let start = Instant::now();
        let output = session
            .raw_command(command)
            .output()
            .await
            .map_err(|e| map_spawn_error(command, e))?;
        let result = CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        };
        debug!(
            exit = result.exit_code,
            ms = result.duration.as_millis() as u64,
            "exec finished"
        );
        Ok(result)
    }
}

impl TransferChannel for SshSession {
    async fn upload(
        &mut self,
        local: &Path,
        remote_path: &str,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<u64, ChannelError> {
        let result = self.upload_inner(local, remote_path, progress).await;
        if let Err(err) = &result {
            warn!(remote_path, error = %err, "upload failed, removing partial file");
            if self.session.is_some() {
                let cleanup = shell::remove_file(&shell::partial_path(remote_path));
                if let Err(e) = self.execute(&cleanup).await {
                    debug!(error = %e, "partial file cleanup failed");
                }
            }
        }
        result
    }

    async fn download(
        &mut self,
        remote_path: &str,
        local: &Path,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<u64, ChannelError> {
        let total_bytes = probe::remote_size(self, remote_path).await?.unwrap_or(0);
        let partial = local_partial_path(local);

        match self
            .download_inner(remote_path, &partial, total_bytes, progress)
            .await
        {
            Ok(received) => {
                tokio::fs::rename(&partial, local)
                    .await
                    .map_err(|source| ChannelError::LocalIo {
                        path: local.to_path_buf(),
                        source,
                    })?;
                Ok(received)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(err)
            }
        }
    }
}

fn map_spawn_error(command: &str, err: openssh::Error) -> ChannelError {
    if matches!(err, openssh::Error::Disconnected) {
        ChannelError::Closed
    } else {
        ChannelError::Spawn {
            command: command.to_string(),
            message: err.to_string(),
        }
    }
}

/// Local staging file a download is written to before the rename.
pub fn local_partial_path(local: &Path) -> PathBuf {
    let mut name = local
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(shell::PARTIAL_SUFFIX);
    local.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_partial_path_is_a_sibling() {
        assert_eq!(
            local_partial_path(Path::new("/tmp/out/result.txt")),
            PathBuf::from("/tmp/out/result.txt.edgesync-partial")
        );
    }
}
