//! Packing local directories into a single transferable archive.
//!
//! SDK trees hold thousands of small files; probing each one over a slow
//! link costs more than it saves. A package turns a directory into one
//! gzipped tarball, which then goes through the normal artifact sync. On
//! the device a stamp next to the extracted tree records which archive it
//! came from, so an archive is unpacked again only when the stamp is
//! missing or names a different archive.

use crate::errors::PackageError;
use crate::plan::RemoteStep;
use crate::remote::shell;
use crate::types::{TransferTarget, resolve_remote_path};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// One directory to ship as an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    /// Local directory whose contents are packed.
    pub source: PathBuf,
    /// Entries inside `source` to include; empty means everything.
    #[serde(default)]
    pub entries: Vec<String>,
    /// Device directory the archive is extracted into.
    pub remote_dir: String,
    /// Archive file name; derived from `source` when unset.
    #[serde(default)]
    pub archive_name: Option<String>,
}

impl PackageSpec {
    pub fn archive_name(&self) -> String {
        self.archive_name
            .clone()
            .unwrap_or_else(|| default_archive_name(&self.source))
    }

    /// Where the archive lands on the device.
    pub fn remote_archive_path(&self, remote_base: &str) -> String {
        resolve_remote_path(remote_base, &self.archive_name())
    }

    /// Step that unpacks the archive unless its stamp is current.
    pub fn extraction_step(&self, remote_base: &str) -> RemoteStep {
        let archive = self.remote_archive_path(remote_base);
        let dir = resolve_remote_path(remote_base, &self.remote_dir);
        RemoteStep::new(
            format!("extract {}", self.archive_name()),
            shell::extract_archive(&archive, &dir),
        )
    }
}

/// `<dir name>.tar.gz`, or `package.tar.gz` for a path with no name.
pub fn default_archive_name(source: &Path) -> String {
    let stem = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
        .unwrap_or_else(|| "package".to_string());
    format!("{stem}.tar.gz")
}

/// A packed archive waiting to be synced.
#[derive(Debug, Clone)]
pub struct PackagedDirectory {
    pub spec: PackageSpec,
    pub archive: PathBuf,
    pub bytes: u64,
}

impl PackagedDirectory {
    pub fn target(&self, remote_base: &str) -> TransferTarget {
        TransferTarget::new(&self.archive, self.spec.remote_archive_path(remote_base))
    }
}

/// Pack `entries` of `source` (or all of it) into a gzipped tarball.
///
/// Members are sorted by name and carry no owner names, and the gzip
/// header carries no timestamp. Packing an unchanged tree twice yields
/// the same bytes, so the second sync can skip. File mtimes are kept, so
/// a freshly copied tree with identical contents still packs differently.
pub async fn package_directory(
    source: &Path,
    entries: &[String],
    archive: &Path,
) -> Result<u64, PackageError> {
    if !source.is_dir() {
        return Err(PackageError::NotADirectory {
            path: source.to_path_buf(),
        });
    }
    let io_err = |source| PackageError::Io {
        path: archive.to_path_buf(),
        source,
    };

    let out = std::fs::File::create(archive).map_err(io_err)?;

    let mut tar = Command::new("tar");
    tar.args(tar_args(source, entries));
    debug!(source = %source.display(), ?entries, "running tar");
    let mut tar = tar
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(PackageError::Spawn)?;

    let tar_stdout: Stdio = tar
        .stdout
        .take()
        .ok_or_else(|| PackageError::Spawn(std::io::Error::other("tar stdout was not captured")))?
        .try_into()
        .map_err(PackageError::Spawn)?;

    let gzip = Command::new("gzip")
        .arg("-n")
        .stdin(tar_stdout)
        .stdout(Stdio::from(out))
        .stderr(Stdio::piped())
        .spawn()
        .map_err(PackageError::Spawn)?;

    let tar_output = tar.wait_with_output().await.map_err(PackageError::Spawn)?;
    let gzip_output = gzip.wait_with_output().await.map_err(PackageError::Spawn)?;

    if !tar_output.status.success() {
        return Err(PackageError::Tar {
            status: tar_output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&tar_output.stderr).trim().to_string(),
        });
    }
    if !gzip_output.status.success() {
        return Err(PackageError::Tar {
            status: gzip_output.status.code().unwrap_or(-1),
            stderr: format!("gzip: {}", String::from_utf8_lossy(&gzip_output.stderr).trim()),
        });
    }

    let bytes = std::fs::metadata(archive).map_err(io_err)?.len();
    info!(
        source = %source.display(),
        archive = %archive.display(),
        bytes,
        "packed directory"
    );
    Ok(bytes)
}

/// GNU tar arguments writing a deterministic archive of `source` to stdout.
fn tar_args(source: &Path, entries: &[String]) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--sort=name",
        "--owner=0",
        "--group=0",
        "--numeric-owner",
        "-cf",
        "-",
        "-C",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(source.as_os_str().to_owned());
    if entries.is_empty() {
        args.push(".".into());
    } else {
        args.extend(entries.iter().map(OsString::from));
    }
    args
}

/// Pack every spec into `staging_dir`.
pub async fn package_all(
    specs: &[PackageSpec],
    staging_dir: &Path,
) -> Result<Vec<PackagedDirectory>, PackageError> {
    let mut packed = Vec::with_capacity(specs.len());
    for spec in specs {
        let archive = staging_dir.join(spec.archive_name());
        let bytes = package_directory(&spec.source, &spec.entries, &archive).await?;
        packed.push(PackagedDirectory {
            spec: spec.clone(),
            archive,
            bytes,
        });
    }
    Ok(packed)
}
