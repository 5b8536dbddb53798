//! Logging setup shared by the CLI and tests.
//!
//! Console output is either human-readable or JSON lines. An optional log
//! file always gets JSON lines through a non-blocking writer; keep the
//! returned [`LoggingGuards`] alive until exit or the tail is lost.

use crate::config::env::{EnvParser, is_log_level};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;

/// Console log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("log format 'pretty' or 'json' (got '{other}')")),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },

    #[error("failed to open log file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global subscriber is already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Level or full `EnvFilter` directive, e.g. `info,edgesync=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Write console logs to stderr instead of stdout.
    pub stderr: bool,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            stderr: false,
            file: None,
        }
    }
}

impl LogConfig {
    /// Defaults overridden by `EDGESYNC_LOG_LEVEL`, `EDGESYNC_LOG_FORMAT`
    /// and `EDGESYNC_LOG_FILE`. Invalid values fall back to the defaults.
    pub fn from_env(default_level: &str) -> Self {
        let mut env = EnvParser::new();
        let level = env.get_log_level("LOG_LEVEL", default_level).into_inner();
        let format = env.get_parsed("LOG_FORMAT", LogFormat::Pretty).into_inner();
        let file = env.get_optional_path("LOG_FILE").into_inner();
        Self {
            level,
            format,
            stderr: false,
            file,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directive = if is_log_level(&self.level) {
            // keep dependencies quiet unless asked
            format!("warn,edgesync={0},edgesync_common={0}", self.level)
        } else {
            self.level.clone()
        };
        EnvFilter::try_new(&directive).map_err(|e| LoggingError::Filter {
            filter: directive,
            message: e.to_string(),
        })
    }
}

/// Keeps the non-blocking file writer flushing.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let filter = config.filter()?;

    let writer = if config.stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };
    let console = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed(),
    };

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir).map_err(|source| LoggingError::File {
                path: path.clone(),
                source,
            })?;
            let name = path.file_name().map(PathBuf::from).ok_or_else(|| LoggingError::File {
                path: path.clone(),
                source: std::io::Error::other("log file path has no file name"),
            })?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(LoggingGuards { _file: guard })
}
