//! Timing extraction from remote output.
//!
//! The inference harness prints lines like `Inference time: 12.5 ms` (or
//! `0.0125 seconds`). A [`TimingPattern`] pulls those numbers out of step
//! stdout and normalizes them to milliseconds.

use crate::errors::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches `Inference time: <number> <unit>` with s, ms or us units.
pub const DEFAULT_TIMING_PATTERN: &str =
    r"(?i)inference time:\s*(?P<value>[0-9]+(?:\.[0-9]+)?)\s*(?P<unit>ms|us|seconds|second|secs|sec|s)\b";

/// A regex that locates timing values.
///
/// The regex must have either a named group `ms` (value already in
/// milliseconds) or a named group `value` with an optional `unit` group.
/// Without a `unit` group, `value` is taken as milliseconds.
#[derive(Debug, Clone)]
pub struct TimingPattern {
    regex: Regex,
}

impl TimingPattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern)
            .map_err(|e| ConfigError::Invalid(format!("timing pattern: {e}")))?;
        let names: Vec<&str> = regex.capture_names().flatten().collect();
        if !names.contains(&"ms") && !names.contains(&"value") {
            return Err(ConfigError::Invalid(
                "timing pattern needs a named group `ms` or `value`".to_string(),
            ));
        }
        Ok(Self { regex })
    }

    /// The pattern for `Inference time: ...` lines.
    pub fn inference_time() -> Result<Self, ConfigError> {
        Self::new(DEFAULT_TIMING_PATTERN)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Every timing in `text`, in milliseconds, in order of appearance.
    pub fn extract_timings(&self, text: &str) -> Vec<f64> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| {
                if let Some(ms) = caps.name("ms") {
                    return ms.as_str().parse::<f64>().ok();
                }
                let value = caps.name("value")?.as_str().parse::<f64>().ok()?;
                let unit = caps.name("unit").map(|u| u.as_str()).unwrap_or("ms");
                Some(value * unit_scale(unit)?)
            })
            .collect()
    }

    pub fn summary(&self, text: &str) -> Option<TimingSummary> {
        TimingSummary::from_samples(&self.extract_timings(text))
    }
}

fn unit_scale(unit: &str) -> Option<f64> {
    match unit.to_ascii_lowercase().as_str() {
        "ms" => Some(1.0),
        "us" => Some(0.001),
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1000.0),
        _ => None,
    }
}

/// Aggregate of timing samples, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
}

impl TimingSummary {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let min_ms = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean_ms = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(Self {
            count: samples.len(),
            min_ms,
            max_ms,
            mean_ms,
        })
    }
}

impl std::fmt::Display for TimingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} run(s): mean {:.2} ms, min {:.2} ms, max {:.2} ms",
            self.count, self.mean_ms, self.min_ms, self.max_ms
        )
    }
}
