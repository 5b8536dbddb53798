//! Structured logging for tests.
//!
//! `init_test_logging()` routes tracing output through the libtest
//! capture so it only shows for failing tests. [`TestLogger`] brackets a
//! test with `TEST START` / `TEST PASS` / `TEST FAIL` lines and keeps the
//! entries in memory as JSON-serializable records.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Instant;

/// Test execution phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    Setup,
    Execute,
    Verify,
    Teardown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Execute => write!(f, "execute"),
            Self::Verify => write!(f, "verify"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

/// Install a test-writer subscriber. Safe to call from every test.
///
/// `EDGESYNC_TEST_LOG_LEVEL` picks the level (default `debug`).
pub fn init_test_logging() {
    let level = std::env::var("EDGESYNC_TEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
    let filter = tracing_subscriber::EnvFilter::try_new(format!(
        "edgesync={level},edgesync_common={level}"
    ))
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .compact()
        .try_init();
}

/// One record written by [`TestLogger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    pub timestamp: String,
    pub test_name: String,
    pub phase: TestPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub elapsed_ms: u64,
}

/// Phase-tagged log for a single test.
pub struct TestLogger {
    test_name: String,
    start: Instant,
    entries: Mutex<Vec<TestLogEntry>>,
}

impl TestLogger {
    pub fn for_test(test_name: &str) -> Self {
        init_test_logging();
        let logger = Self {
            test_name: test_name.to_string(),
            start: Instant::now(),
            entries: Mutex::new(Vec::new()),
        };
        logger.log(TestPhase::Setup, "TEST START");
        logger
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        self.push(phase, message.into(), None);
    }

    pub fn log_with_data(&self, phase: TestPhase, message: impl Into<String>, data: serde_json::Value) {
        self.push(phase, message.into(), Some(data));
    }

    fn push(&self, phase: TestPhase, message: String, data: Option<serde_json::Value>) {
        let entry = TestLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            test_name: self.test_name.clone(),
            phase,
            message,
            data,
            elapsed_ms: self.start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            test = %entry.test_name,
            phase = %entry.phase,
            elapsed_ms = entry.elapsed_ms,
            "{}",
            entry.message
        );
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    pub fn pass(self) {
        self.log(TestPhase::Verify, "TEST PASS");
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.log_with_data(
            TestPhase::Verify,
            "TEST FAIL",
            serde_json::json!({ "reason": reason.into() }),
        );
    }

    pub fn entries(&self) -> Vec<TestLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}
