//! Shared library for edgesync.
//!
//! The core of this crate is [`sync`], the incremental artifact-sync
//! protocol: decide per file whether an upload to the device is needed,
//! using a size probe that escalates to a content digest only when the
//! sizes agree. Everything else supports it:
//!
//! - [`remote`]: the command and transfer channel traits, plus the
//!   `openssh`-backed session that implements both.
//! - [`plan`]: ordered remote steps with per-step success checks.
//! - [`timing`]: timing extraction from remote output.
//! - [`package`]: packing local directories into a single artifact.
//! - [`config`]: manifest loading and environment overrides.
//! - [`mock`]: an in-memory device for tests.
//! - [`testing`]: phase-tagged test logging.

#![deny(unsafe_code)]

pub mod config;
pub mod digest;
pub mod errors;
pub mod logging;
pub mod mock;
pub mod package;
pub mod plan;
pub mod remote;
pub mod sync;
pub mod testing;
pub mod timing;
pub mod types;

pub use config::{DeviceConfig, EdgeSyncConfig, SyncSettings};
pub use digest::DigestAlgorithm;
pub use errors::{ChannelError, ConfigError, PackageError, PlanError, SyncError};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use plan::{PlanReport, RemotePlan, RemoteStep, StepCheck, StepReport, StepStatus};
pub use remote::{CommandChannel, CommandResult, TransferChannel, TransferProgress};
pub use sync::{SyncPolicy, sync_artifact, sync_batch};
pub use timing::{TimingPattern, TimingSummary};
pub use types::{SkipReason, SyncOutcome, SyncReport, TargetResult, TransferTarget};

#[cfg(unix)]
pub use remote::ssh::SshSession;
