//! In-memory device for tests.
//!
//! [`MockDevice`] implements both channel traits against a fake remote
//! filesystem. It understands the handful of commands the sync protocol
//! and probes issue (`stat -c %s`, `md5sum`, `sha256sum`, `mkdir -p`,
//! `[ -f ]`, `[ -d ]`, `rm -f`, `echo`), records everything it is asked
//! to do, and can be told to fail in specific ways. Any other command
//! succeeds with empty output unless a canned response matches.

use crate::digest::{DigestAlgorithm, digest_bytes};
use crate::errors::ChannelError;
use crate::remote::{CommandChannel, CommandResult, TransferChannel, TransferProgress};
use crate::types::remote_parent;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Chunk size for the progress callbacks the mock emits.
const MOCK_CHUNK: usize = 64 * 1024;

/// One recorded upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockUpload {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Contains(String),
}

impl Matcher {
    fn matches(&self, command: &str) -> bool {
        match self {
            Self::Exact(s) => command == s,
            Self::Contains(s) => command.contains(s.as_str()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockDevice {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    responses: Vec<(Matcher, CommandResult)>,
    failing_prefixes: Vec<String>,
    fail_uploads: bool,
    uploads_before_close: Option<usize>,
    closed: bool,
    commands: Vec<String>,
    uploads: Vec<MockUpload>,
    downloads: Vec<String>,
}

impl MockDevice {
    pub fn new() -> Self {
        let mut device = Self::default();
        device.dirs.insert("/".to_string());
        device
    }

    /// Place a file on the device, creating its parent directories.
    pub fn put_file(&mut self, path: &str, content: Vec<u8>) {
        if let Some(parent) = remote_parent(path) {
            self.mkdir_p(parent);
        }
        self.files.insert(path.to_string(), content);
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.contains(path.trim_end_matches('/')) || path == "/"
    }

    /// Paths of every file on the device.
    pub fn file_paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    /// Answer `command` with `result` instead of interpreting it.
    pub fn respond_to(&mut self, command: &str, result: CommandResult) {
        self.responses
            .push((Matcher::Exact(command.to_string()), result));
    }

    /// Answer any command containing `fragment` with `result`.
    pub fn respond_when_contains(&mut self, fragment: &str, result: CommandResult) {
        self.responses
            .push((Matcher::Contains(fragment.to_string()), result));
    }

    /// Make commands starting with `prefix` exit with status 1.
    pub fn fail_commands_starting_with(&mut self, prefix: &str) {
        self.failing_prefixes.push(prefix.to_string());
    }

    /// Make every upload fail mid-stream.
    pub fn fail_uploads(&mut self) {
        self.fail_uploads = true;
    }

    /// Let `n` uploads succeed, then drop the session.
    pub fn close_after_uploads(&mut self, n: usize) {
        self.uploads_before_close = Some(n);
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn uploads(&self) -> &[MockUpload] {
        &self.uploads
    }

    pub fn downloads(&self) -> &[String] {
        &self.downloads
    }

    pub fn count_commands_starting_with(&self, prefix: &str) -> usize {
        self.commands.iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Number of remote digest commands issued.
    pub fn digest_calls(&self) -> usize {
        self.count_commands_starting_with("md5sum ") + self.count_commands_starting_with("sha256sum ")
    }

    /// Forget recorded commands and transfers; the filesystem is kept.
    pub fn clear_log(&mut self) {
        self.commands.clear();
        self.uploads.clear();
        self.downloads.clear();
    }

    fn mkdir_p(&mut self, path: &str) {
        let mut current = Some(path.trim_end_matches('/'));
        while let Some(dir) = current {
            if dir.is_empty() || dir == "/" {
                break;
            }
            self.dirs.insert(dir.to_string());
            current = remote_parent(dir);
        }
    }

    fn interpret(&mut self, command: &str) -> CommandResult {
        let Ok(words) = shell_words::split(command) else {
            return CommandResult::failed(2, "syntax error");
        };
        let words: Vec<&str> = words.iter().map(String::as_str).collect();

        match words.as_slice() {
            ["stat", "-c", "%s", path] => match self.files.get(*path) {
                Some(content) => CommandResult::ok(format!("{}\n", content.len())),
                None => CommandResult::failed(
                    1,
                    format!("stat: cannot stat '{path}': No such file or directory"),
                ),
            },
            [tool @ ("md5sum" | "sha256sum"), path] => {
                let algorithm = if *tool == "md5sum" {
                    DigestAlgorithm::Md5
                } else {
                    DigestAlgorithm::Sha256
                };
                match self.files.get(*path) {
                    Some(content) => {
                        CommandResult::ok(format!("{}  {path}\n", digest_bytes(algorithm, content)))
                    }
                    None => CommandResult::failed(
                        1,
                        format!("{tool}: {path}: No such file or directory"),
                    ),
                }
            }
            ["mkdir", "-p", path] => {
                if self.files.contains_key(*path) {
                    CommandResult::failed(1, format!("mkdir: cannot create directory '{path}': File exists"))
                } else {
                    self.mkdir_p(path);
                    CommandResult::ok("")
                }
            }
            ["[", "-f", path, "]"] => exit_status(self.files.contains_key(*path)),
            ["[", "-d", path, "]"] => exit_status(self.has_dir(path)),
            ["rm", "-f", path] => {
                self.files.remove(*path);
                CommandResult::ok("")
            }
            ["echo", rest @ ..] => CommandResult::ok(format!("{}\n", rest.join(" "))),
            ["true"] => CommandResult::ok(""),
            ["false"] => CommandResult::failed(1, ""),
            _ => CommandResult::ok(""),
        }
    }
}

fn exit_status(ok: bool) -> CommandResult {
    if ok {
        CommandResult::ok("")
    } else {
        CommandResult::failed(1, "")
    }
}

impl CommandChannel for MockDevice {
    async fn execute(&mut self, command: &str) -> Result<CommandResult, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        debug!(%command, "mock exec");
        self.commands.push(command.to_string());

        if let Some((_, result)) = self.responses.iter().rev().find(|(m, _)| m.matches(command)) {
            return Ok(result.clone());
        }
        if self.failing_prefixes.iter().any(|p| command.starts_with(p.as_str())) {
            return Ok(CommandResult::failed(1, "injected failure"));
        }
        Ok(self.interpret(command))
    }
}

impl TransferChannel for MockDevice {
    async fn upload(
        &mut self,
        local: &Path,
        remote_path: &str,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<u64, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if let Some(remaining) = self.uploads_before_close {
            if remaining == 0 {
                self.closed = true;
                return Err(ChannelError::Closed);
            }
            self.uploads_before_close = Some(remaining - 1);
        }

        let content = std::fs::read(local).map_err(|source| ChannelError::LocalIo {
            path: local.to_path_buf(),
            source,
        })?;
        let parent_exists = remote_parent(remote_path).is_none_or(|p| self.has_dir(p));
        if !parent_exists {
            return Err(ChannelError::Transfer {
                remote_path: remote_path.to_string(),
                message: "No such file or directory".to_string(),
            });
        }

        let total_bytes = content.len() as u64;
        let mut bytes_sent = 0u64;
        progress(TransferProgress {
            bytes_sent,
            total_bytes,
        });
        for chunk in content.chunks(MOCK_CHUNK) {
            if self.fail_uploads && bytes_sent > 0 {
                break;
            }
            bytes_sent += chunk.len() as u64;
            progress(TransferProgress {
                bytes_sent,
                total_bytes,
            });
        }
        if self.fail_uploads {
            return Err(ChannelError::Transfer {
                remote_path: remote_path.to_string(),
                message: format!("connection reset after {bytes_sent} bytes"),
            });
        }

        self.files.insert(remote_path.to_string(), content);
        self.uploads.push(MockUpload {
            local_path: local.to_path_buf(),
            remote_path: remote_path.to_string(),
            bytes: total_bytes,
        });
        Ok(total_bytes)
    }

    async fn download(
        &mut self,
        remote_path: &str,
        local: &Path,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<u64, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let content = self
            .files
            .get(remote_path)
            .cloned()
            .ok_or_else(|| ChannelError::Transfer {
                remote_path: remote_path.to_string(),
                message: "No such file or directory".to_string(),
            })?;
        std::fs::write(local, &content).map_err(|source| ChannelError::LocalIo {
            path: local.to_path_buf(),
            source,
        })?;
        let total_bytes = content.len() as u64;
        progress(TransferProgress {
            bytes_sent: total_bytes,
            total_bytes,
        });
        self.downloads.push(remote_path.to_string());
        Ok(total_bytes)
    }
}
