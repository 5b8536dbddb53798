//! Subcommand implementations.
//!
//! Each command takes the open session and the loaded configuration and
//! returns `Ok(false)` when it ran to the end but something on the device
//! failed, so `main` can pick the exit status.

pub mod deploy;
pub mod fetch;
pub mod helpers;
pub mod probe;
pub mod run;
pub mod sync;
