//! Shell command construction for the device side.
//!
//! Every path or value spliced into a remote command goes through
//! [`quote`]. Commands are plain strings because the device runs them
//! through its login shell; quoting is the only thing keeping a path with
//! a space or `$` from turning into something else.

use crate::digest::DigestAlgorithm;
use std::borrow::Cow;

/// Suffix of the temporary file an upload streams into before the rename.
pub const PARTIAL_SUFFIX: &str = ".edgesync-partial";

/// Quote a single word for a POSIX shell.
pub fn quote(s: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(s)).into_owned()
}

/// Print the size of `path` in bytes.
pub fn stat_size(path: &str) -> String {
    format!("stat -c %s {}", quote(path))
}

/// Print `<hex>  <path>` for `path`.
pub fn digest(algorithm: DigestAlgorithm, path: &str) -> String {
    format!("{} {}", algorithm.remote_tool(), quote(path))
}

pub fn mkdir_p(dir: &str) -> String {
    format!("mkdir -p {}", quote(dir))
}

pub fn file_exists(path: &str) -> String {
    format!("[ -f {} ]", quote(path))
}

pub fn dir_exists(path: &str) -> String {
    format!("[ -d {} ]", quote(path))
}

pub fn remove_file(path: &str) -> String {
    format!("rm -f {}", quote(path))
}

/// Print the first file named `name` under any of `roots`.
pub fn locate(roots: &[String], name: &str) -> String {
    let roots: Vec<String> = roots.iter().map(|r| quote(r)).collect();
    format!(
        "find {} -name {} 2>/dev/null | head -n 1",
        roots.join(" "),
        quote(name)
    )
}

/// Print available kilobytes on the filesystem holding `path`.
pub fn free_kb(path: &str) -> String {
    format!("df -Pk {} | tail -1 | awk '{{print $4}}'", quote(path))
}

/// Temporary sibling an upload to `dest` is staged in.
pub fn partial_path(dest: &str) -> String {
    format!("{dest}{PARTIAL_SUFFIX}")
}

/// Read stdin into the partial file, then rename it over `dest`.
///
/// The rename only happens after `cat` saw end-of-stream and exited
/// cleanly, so `dest` never holds a truncated file.
pub fn receive_into(dest: &str) -> String {
    let partial = quote(&partial_path(dest));
    format!("cat > {partial} && mv -f {partial} {}", quote(dest))
}

/// Stream `path` to stdout.
pub fn send_file(path: &str) -> String {
    format!("cat {}", quote(path))
}

/// Name of the stamp file an extraction leaves in its target directory.
pub const EXTRACT_STAMP: &str = ".edgesync-extracted";

/// Extract a gzipped tarball into `dir`, unless that exact archive was
/// already extracted there.
///
/// The stamp holds the archive's `md5sum` line and is written only after
/// `tar` succeeds. A missing or stale stamp means extract again. The
/// archive stays on the device so the next sync can skip it.
pub fn extract_archive(archive: &str, dir: &str) -> String {
    let stamp = quote(&format!("{}/{EXTRACT_STAMP}", dir.trim_end_matches('/')));
    format!(
        "md5sum {archive} | cmp -s - {stamp} || {{ mkdir -p {dir} && tar -xzf {archive} -C {dir} && md5sum {archive} > {stamp}; }}",
        dir = quote(dir),
        archive = quote(archive),
    )
}

/// Wrap `command` with a working directory and environment.
///
/// Variables are exported rather than prefixed so every command of a
/// compound line (`make && ./infer`) sees them. Values are spliced in as
/// given; render them with [`env_value_with_expansion`] first. Names must
/// be valid identifiers.
pub fn with_context(workdir: Option<&str>, env: &[(String, String)], command: &str) -> String {
    let mut parts = Vec::new();
    if let Some(dir) = workdir {
        parts.push(format!("cd {}", quote(dir)));
    }
    for (key, value) in env {
        parts.push(format!("export {key}={value}"));
    }
    parts.push(command.to_string());
    parts.join(" && ")
}

/// Render an environment value for [`with_context`].
///
/// `$NAME` references (e.g. `$LD_LIBRARY_PATH`) stay live so a step can
/// prepend to an existing path; everything else is quoted literally.
pub fn env_value_with_expansion(value: &str) -> String {
    let mut out = String::new();
    let mut literal = String::new();
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') {
            if !literal.is_empty() {
                out.push_str(&quote(&literal));
                literal.clear();
            }
            out.push_str("\"$");
            while let Some(&n) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    out.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push('"');
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() || out.is_empty() {
        out.push_str(&quote(&literal));
    }
    out
}

/// Whether `name` is a valid shell variable name.
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
