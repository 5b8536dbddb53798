//! Test helpers shared by unit and integration tests.

pub mod log;

pub use log::{TestLogEntry, TestLogger, TestPhase, init_test_logging};
