//! Content digests computed on both ends of the link.
//!
//! The local side streams the file through the hasher in fixed-size
//! chunks so peak memory stays at one chunk regardless of file size. The
//! remote side runs the matching coreutils tool (`md5sum`, `sha256sum`),
//! which every board image we target ships.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Default read size for local hashing: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Digest algorithm used for the strong integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Remote tool that prints `<hex>  <path>` for this algorithm.
    pub fn remote_tool(self) -> &'static str {
        match self {
            Self::Md5 => "md5sum",
            Self::Sha256 => "sha256sum",
        }
    }

    /// Length of the lowercase hex digest.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    /// Parse the output of [`Self::remote_tool`].
    ///
    /// Returns `None` unless the first field is a well-formed hex digest of
    /// the expected length; error text from a missing file never parses.
    pub fn parse_remote_output(self, stdout: &str) -> Option<String> {
        let first = stdout.split_whitespace().next()?;
        // md5sum prefixes the digest with a backslash when the path needs escaping
        let first = first.strip_prefix('\\').unwrap_or(first);
        if first.len() == self.hex_len() && first.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(first.to_ascii_lowercase())
        } else {
            None
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            other => Err(format!("unknown digest algorithm '{other}' (expected md5 or sha256)")),
        }
    }
}

/// Hash `bytes` in memory.
pub fn digest_bytes(algorithm: DigestAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Md5 => format!("{:x}", Md5::digest(bytes)),
        DigestAlgorithm::Sha256 => format!("{:x}", Sha256::digest(bytes)),
    }
}

/// Hash a local file, reading `chunk_size` bytes at a time.
pub fn digest_file(
    algorithm: DigestAlgorithm,
    path: &Path,
    chunk_size: usize,
) -> std::io::Result<String> {
    let file = std::fs::File::open(path)?;
    match algorithm {
        DigestAlgorithm::Md5 => stream_into::<Md5>(file, chunk_size),
        DigestAlgorithm::Sha256 => stream_into::<Sha256>(file, chunk_size),
    }
}

fn stream_into<D: Digest>(mut reader: impl Read, chunk_size: usize) -> std::io::Result<String>
where
    sha2::digest::Output<D>: std::fmt::LowerHex,
{
    let mut hasher = D::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
