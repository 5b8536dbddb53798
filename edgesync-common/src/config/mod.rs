//! Deployment manifest and configuration.
//!
//! Configuration is layered, later layers winning:
//!
//! 1. built-in defaults,
//! 2. the TOML manifest (`edgesync.toml`, `--config`, or `EDGESYNC_CONFIG`),
//! 3. `EDGESYNC_*` environment variables.
//!
//! Relative local paths in the manifest resolve against the manifest's own
//! directory; relative remote paths resolve against `device.remote_base`.

pub mod env;
pub mod source;

pub use env::{ENV_PREFIX, EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use crate::digest::{DEFAULT_CHUNK_SIZE, DigestAlgorithm};
use crate::errors::{ConfigError, PlanError};
use crate::logging::{LogConfig, LogFormat};
use crate::package::PackageSpec;
use crate::plan::{RemotePlan, RemoteStep, StepCheck};
use crate::sync::{DEFAULT_INTEGRITY_CEILING, SyncPolicy};
use crate::timing::{DEFAULT_TIMING_PATTERN, TimingPattern};
use crate::types::{TransferTarget, remote_path_in_dir, resolve_remote_path};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manifest file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "edgesync.toml";

/// Largest accepted hashing chunk: 64 MiB.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeSyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    /// Plan-wide defaults for `[[step]]` entries.
    #[serde(default)]
    pub plan: PlanSettings,
    #[serde(default, rename = "artifact")]
    pub artifacts: Vec<ArtifactEntry>,
    #[serde(default, rename = "package")]
    pub packages: Vec<PackageSpec>,
    #[serde(default, rename = "step")]
    pub steps: Vec<StepEntry>,
    /// Directory relative local paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// How to reach the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
    /// Absolute directory on the device that relative remote paths live in.
    pub remote_base: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            user: None,
            identity_file: None,
            connect_timeout_secs: 30,
            keepalive_secs: 30,
            remote_base: String::new(),
        }
    }
}

impl DeviceConfig {
    /// `user@host`, or just `host`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

/// `[sync]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub verify_integrity: bool,
    pub integrity_ceiling_bytes: u64,
    pub chunk_size: usize,
    pub digest: DigestAlgorithm,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            verify_integrity: true,
            integrity_ceiling_bytes: DEFAULT_INTEGRITY_CEILING,
            chunk_size: DEFAULT_CHUNK_SIZE,
            digest: DigestAlgorithm::Md5,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// `[timing]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingSettings {
    pub pattern: String,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_TIMING_PATTERN.to_string(),
        }
    }
}

/// `[plan]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanSettings {
    pub workdir: Option<String>,
    /// Applied to every step, in key order.
    pub env: BTreeMap<String, String>,
}

/// One `[[artifact]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactEntry {
    pub local: PathBuf,
    /// Destination; defaults to the file name under `remote_base`.
    #[serde(default)]
    pub remote: Option<String>,
}

/// One `[[step]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Require this text in stdout.
    #[serde(default)]
    pub expect_stdout: Option<String>,
    /// Record a nonzero exit without stopping the plan.
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default)]
    pub capture_timing: bool,
}

impl StepEntry {
    pub fn to_step(&self) -> RemoteStep {
        let check = if self.allow_failure {
            StepCheck::AllowFailure
        } else if let Some(text) = &self.expect_stdout {
            StepCheck::StdoutContains(text.clone())
        } else {
            StepCheck::ExitZero
        };
        RemoteStep {
            name: self.name.clone(),
            command: self.command.clone(),
            workdir: self.workdir.clone(),
            env: self.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            check,
            capture_timing: self.capture_timing,
        }
    }
}

impl EdgeSyncConfig {
    /// Load, apply environment overrides, and validate.
    ///
    /// `explicit` is a path given by `--config`; without it
    /// `EDGESYNC_CONFIG` and then `./edgesync.toml` are tried. Only an
    /// explicitly named file is required to exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut env = EnvParser::new();
        let from_env = env.get_optional_path("CONFIG").into_inner();

        let (path, required) = match (explicit, from_env) {
            (Some(p), _) => (p.to_path_buf(), true),
            (None, Some(p)) => (p, true),
            (None, None) => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else if required {
            return Err(ConfigError::NotFound { path });
        } else {
            debug!(path = %path.display(), "no manifest found, using defaults");
            Self {
                base_dir: PathBuf::from("."),
                ..Self::default()
            }
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a manifest file without overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!(path = %path.display(), "loaded manifest");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(text)?;
        config.base_dir = PathBuf::from(".");
        config.device.identity_file = config
            .device
            .identity_file
            .take()
            .map(|p| env::expand_home(&p.to_string_lossy()));
        Ok(config)
    }

    /// Apply `EDGESYNC_*` overrides, reporting every bad value together.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let mut env = EnvParser::new();

        let host = env.get_string("HOST", &self.device.host);
        let port = env.get_u64_range("PORT", u64::from(self.device.port), 1, u64::from(u16::MAX));
        let user = env.get_optional_string("USER");
        let identity = env.get_optional_path("IDENTITY_FILE");
        let remote_base = env.get_string("REMOTE_BASE", &self.device.remote_base);
        let verify = env.get_bool("VERIFY_INTEGRITY", self.sync.verify_integrity);
        let ceiling = env.get_u64_range(
            "INTEGRITY_CEILING_BYTES",
            self.sync.integrity_ceiling_bytes,
            1,
            u64::MAX,
        );
        let chunk = env.get_u64_range(
            "CHUNK_SIZE",
            self.sync.chunk_size as u64,
            1,
            MAX_CHUNK_SIZE as u64,
        );
        let digest = env.get_parsed("DIGEST", self.sync.digest);
        let level = env.get_log_level("LOG_LEVEL", &self.logging.level);
        let format = env.get_parsed("LOG_FORMAT", self.logging.format);

        if env.has_errors() {
            return Err(ConfigError::Env(
                env.take_errors().iter().map(ToString::to_string).collect(),
            ));
        }

        self.device.host = host.into_inner();
        self.device.port = u16::try_from(port.into_inner()).unwrap_or(self.device.port);
        if user.is_from_env() {
            self.device.user = user.into_inner();
        }
        if identity.is_from_env() {
            self.device.identity_file = identity.into_inner();
        }
        self.device.remote_base = remote_base.into_inner();
        self.sync.verify_integrity = verify.into_inner();
        self.sync.integrity_ceiling_bytes = ceiling.into_inner();
        self.sync.chunk_size = usize::try_from(chunk.into_inner()).unwrap_or(self.sync.chunk_size);
        self.sync.digest = digest.into_inner();
        self.logging.level = level.into_inner();
        self.logging.format = format.into_inner();
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.device.host.trim().is_empty() {
            problems.push("device.host is required".to_string());
        }
        if !self.device.remote_base.starts_with('/') {
            problems.push(format!(
                "device.remote_base must be an absolute path (got '{}')",
                self.device.remote_base
            ));
        }
        if self.device.port == 0 {
            problems.push("device.port must be non-zero".to_string());
        }
        if self.sync.chunk_size == 0 || self.sync.chunk_size > MAX_CHUNK_SIZE {
            problems.push(format!(
                "sync.chunk_size must be between 1 and {MAX_CHUNK_SIZE} (got {})",
                self.sync.chunk_size
            ));
        }
        if self.sync.integrity_ceiling_bytes == 0 {
            problems.push("sync.integrity_ceiling_bytes must be greater than zero".to_string());
        }
        if let Err(e) = TimingPattern::new(&self.timing.pattern) {
            problems.push(e.to_string());
        }
        for (i, artifact) in self.artifacts.iter().enumerate() {
            if artifact.local.as_os_str().is_empty() {
                problems.push(format!("artifact #{} has an empty local path", i + 1));
            }
        }
        if !self.steps.is_empty() {
            if let Err(e) = self.plan() {
                problems.push(e.to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy::from(&self.sync)
    }

    pub fn log_config(&self) -> LogConfig {
        let mut log = LogConfig::default()
            .with_level(self.logging.level.clone())
            .with_format(self.logging.format);
        if let Some(file) = &self.logging.file {
            log = log.with_file(self.resolve_local(file));
        }
        log
    }

    pub fn timing_pattern(&self) -> Result<TimingPattern, ConfigError> {
        TimingPattern::new(&self.timing.pattern)
    }

    pub fn resolve_local(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn resolve_remote(&self, path: &str) -> String {
        resolve_remote_path(&self.device.remote_base, path)
    }

    /// Transfer targets for every `[[artifact]]`.
    pub fn artifact_targets(&self) -> Vec<TransferTarget> {
        self.artifacts
            .iter()
            .map(|a| {
                let local = self.resolve_local(&a.local);
                let remote = match &a.remote {
                    Some(r) => self.resolve_remote(r),
                    None => remote_path_in_dir(&self.device.remote_base, &local),
                };
                TransferTarget::new(local, remote)
            })
            .collect()
    }

    /// `[[package]]` entries with local sources resolved.
    pub fn package_specs(&self) -> Vec<PackageSpec> {
        self.packages
            .iter()
            .map(|p| PackageSpec {
                source: self.resolve_local(&p.source),
                ..p.clone()
            })
            .collect()
    }

    /// The `[[step]]` entries as a plan rooted at `remote_base`.
    pub fn plan(&self) -> Result<RemotePlan, PlanError> {
        self.plan_with_prelude(Vec::new())
    }

    /// Like [`Self::plan`], with `prelude` steps run before the manifest's.
    pub fn plan_with_prelude(&self, prelude: Vec<RemoteStep>) -> Result<RemotePlan, PlanError> {
        let workdir = match &self.plan.workdir {
            Some(dir) => self.resolve_remote(dir),
            None => self.device.remote_base.clone(),
        };
        let mut builder = RemotePlan::builder("deploy").workdir(workdir);
        for (k, v) in &self.plan.env {
            builder = builder.env(k.clone(), v.clone());
        }
        if let Ok(pattern) = self.timing_pattern() {
            builder = builder.timing_pattern(pattern);
        }
        builder
            .steps(prelude)
            .steps(self.steps.iter().map(|s| {
                let mut step = s.to_step();
                step.workdir = step.workdir.map(|w| self.resolve_remote(&w));
                step
            }))
            .build()
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
