//! Error types for edgesync.
//!
//! Each error maps to a stable code so operators can grep logs and
//! scripts can branch on failures without parsing messages.
//!
//! | Range      | Category    | Description                          |
//! |------------|-------------|--------------------------------------|
//! | E001-E099  | Config      | Manifest and environment errors      |
//! | E100-E199  | Channel     | SSH session and command transport    |
//! | E300-E399  | Plan        | Remote step execution                |
//! | E400-E499  | Transfer    | Artifact sync and packaging          |

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a command or transfer channel.
///
/// A remote command that runs and exits nonzero is *not* a channel error;
/// it comes back as a [`crate::CommandResult`] with a nonzero exit code.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The SSH session could not be established.
    #[error("failed to connect to {destination}: {message}")]
    Connect {
        destination: String,
        message: String,
    },

    /// The remote command could not be started or its status was lost.
    #[error("remote command `{command}` could not be run: {message}")]
    Spawn { command: String, message: String },

    /// The stream to or from the device broke mid-transfer.
    #[error("transfer to {remote_path} failed: {message}")]
    Transfer {
        remote_path: String,
        message: String,
    },

    /// Local I/O failed while feeding or draining a channel.
    #[error("local I/O error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The session was already closed.
    #[error("session is closed")]
    Closed,
}

impl ChannelError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "ES-E100",
            Self::Spawn { .. } => "ES-E101",
            Self::Closed => "ES-E102",
            Self::Transfer { .. } => "ES-E400",
            Self::LocalIo { .. } => "ES-E401",
        }
    }
}

/// Errors surfaced by [`crate::sync_artifact`].
///
/// Probe failures are deliberately absent: an unreadable remote size or
/// digest degrades to "transfer needed" instead of failing the call.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local artifact does not exist. Non-fatal for a batch.
    #[error("local artifact not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The local artifact exists but could not be read.
    #[error("failed to read local artifact {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote parent directory could not be created.
    #[error("could not create remote directory {dir}: {message}")]
    RemoteDir { dir: String, message: String },

    /// The bulk transfer failed.
    #[error("upload of {} to {remote_path} failed: {source}", local_path.display())]
    Transfer {
        local_path: PathBuf,
        remote_path: String,
        #[source]
        source: ChannelError,
    },
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ES-E402",
            Self::LocalIo { .. } => "ES-E403",
            Self::RemoteDir { .. } => "ES-E404",
            Self::Transfer { .. } => "ES-E405",
        }
    }

    /// Whether the batch should keep going after this error.
    ///
    /// Every sync error is scoped to a single target; only channel
    /// breakage below it (a dead session) justifies stopping early.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transfer {
                source: ChannelError::Closed | ChannelError::Connect { .. },
                ..
            }
        )
    }
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid environment overrides: {}", .0.join("; "))]
    Env(Vec<String>),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ES-E001",
            Self::Read { .. } => "ES-E002",
            Self::Parse { .. } => "ES-E003",
            Self::Invalid(_) => "ES-E004",
            Self::Env(_) => "ES-E005",
        }
    }
}

/// Errors building or running a remote plan.
///
/// A step that runs and fails its check is recorded in the
/// [`crate::PlanReport`]; only transport breakage becomes a `PlanError`.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan `{plan}` has no steps")]
    Empty { plan: String },

    #[error("duplicate step name `{name}` in plan `{plan}`")]
    DuplicateStep { plan: String, name: String },

    #[error("invalid environment variable name `{name}` in step `{step}`")]
    InvalidEnvName { step: String, name: String },

    #[error("step `{step}` aborted: {source}")]
    Channel {
        step: String,
        #[source]
        source: ChannelError,
    },
}

impl PlanError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Empty { .. } => "ES-E300",
            Self::DuplicateStep { .. } => "ES-E301",
            Self::InvalidEnvName { .. } => "ES-E302",
            Self::Channel { .. } => "ES-E303",
        }
    }
}

/// Errors packing a local directory into an archive.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("package source is not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("failed to run tar: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("tar exited with status {status}: {stderr}")]
    Tar { status: i32, stderr: String },

    #[error("failed to write archive {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PackageError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotADirectory { .. } => "ES-E410",
            Self::Spawn(_) => "ES-E411",
            Self::Tar { .. } => "ES-E412",
            Self::Io { .. } => "ES-E413",
        }
    }
}
