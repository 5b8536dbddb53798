//! Remote plans: ordered shell steps with per-step success checks.
//!
//! A plan runs its steps one after another over a [`CommandChannel`]. The
//! first step whose check fails stops the plan and every later step is
//! reported as skipped, so the report always names the step that broke.

use crate::errors::{ChannelError, PlanError};
use crate::remote::{CommandChannel, CommandResult, shell};
use crate::timing::{TimingPattern, TimingSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// How a step decides whether it succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCheck {
    /// Exit status 0.
    #[default]
    ExitZero,
    /// Exit status 0 and stdout contains the text.
    StdoutContains(String),
    /// Always succeeds; the exit status is only recorded.
    AllowFailure,
}

impl StepCheck {
    fn passes(&self, result: &CommandResult) -> bool {
        match self {
            Self::ExitZero => result.success(),
            Self::StdoutContains(text) => result.success() && result.stdout.contains(text.as_str()),
            Self::AllowFailure => true,
        }
    }
}

/// One shell command to run on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStep {
    pub name: String,
    pub command: String,
    /// Directory to `cd` into first; falls back to the plan's.
    pub workdir: Option<String>,
    /// Extra environment, in order. Values may reference `$VARS`.
    pub env: Vec<(String, String)>,
    pub check: StepCheck,
    /// Extract timing values from stdout into the report.
    pub capture_timing: bool,
}

impl RemoteStep {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            workdir: None,
            env: Vec::new(),
            check: StepCheck::ExitZero,
            capture_timing: false,
        }
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn check(mut self, check: StepCheck) -> Self {
        self.check = check;
        self
    }

    pub fn expect_stdout(self, text: impl Into<String>) -> Self {
        self.check(StepCheck::StdoutContains(text.into()))
    }

    pub fn allow_failure(self) -> Self {
        self.check(StepCheck::AllowFailure)
    }

    pub fn capture_timing(mut self) -> Self {
        self.capture_timing = true;
        self
    }

    /// Render the full shell line, merging in plan-wide defaults.
    ///
    /// Step values win over plan values for both the working directory
    /// and any environment variable set in both places.
    pub fn render(&self, plan_workdir: Option<&str>, plan_env: &[(String, String)]) -> String {
        let workdir = self.workdir.as_deref().or(plan_workdir);
        let mut env: Vec<(String, String)> = plan_env
            .iter()
            .filter(|(k, _)| !self.env.iter().any(|(sk, _)| sk == k))
            .cloned()
            .collect();
        env.extend(self.env.iter().cloned());
        let rendered: Vec<(String, String)> = env
            .into_iter()
            .map(|(k, v)| {
                let v = shell::env_value_with_expansion(&v);
                (k, v)
            })
            .collect();
        shell::with_context(workdir, &rendered, &self.command)
    }
}

/// Status of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    /// Not run because an earlier step failed.
    Skipped,
}

/// What happened to one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    /// Timings extracted from stdout, in milliseconds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timings_ms: Vec<f64>,
}

impl StepReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Pending,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            started_at: None,
            timings_ms: Vec::new(),
        }
    }

    fn record(&mut self, result: CommandResult, passed: bool) {
        self.status = if passed {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        self.exit_code = Some(result.exit_code);
        self.duration_ms = result.duration.as_millis() as u64;
        self.stdout = result.stdout;
        self.stderr = result.stderr;
    }
}

/// Outcome of [`RemotePlan::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan: String,
    pub steps: Vec<StepReport>,
    pub succeeded: bool,
}

impl PlanReport {
    /// The step that stopped the plan, if any.
    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Summary over the timings of every step that captured any.
    pub fn timing_summary(&self) -> Option<TimingSummary> {
        let samples: Vec<f64> = self
            .steps
            .iter()
            .flat_map(|s| s.timings_ms.iter().copied())
            .collect();
        TimingSummary::from_samples(&samples)
    }
}

/// An ordered, validated list of remote steps.
#[derive(Debug, Clone)]
pub struct RemotePlan {
    name: String,
    workdir: Option<String>,
    env: Vec<(String, String)>,
    steps: Vec<RemoteStep>,
    timing: Option<TimingPattern>,
}

impl RemotePlan {
    pub fn builder(name: impl Into<String>) -> RemotePlanBuilder {
        RemotePlanBuilder {
            name: name.into(),
            workdir: None,
            env: Vec::new(),
            steps: Vec::new(),
            timing: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[RemoteStep] {
        &self.steps
    }

    /// Shell line for each step, in order.
    pub fn rendered_commands(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|s| s.render(self.workdir.as_deref(), &self.env))
            .collect()
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// Returns `Err` only when the channel itself breaks.
    pub async fn run<C: CommandChannel>(&self, channel: &mut C) -> Result<PlanReport, PlanError> {
        let mut reports: Vec<StepReport> = self.steps.iter().map(|s| StepReport::new(&s.name)).collect();
        let mut succeeded = true;
        info!(plan = %self.name, steps = self.steps.len(), "running plan");

        for (step, report) in self.steps.iter().zip(reports.iter_mut()) {
            if !succeeded {
                report.status = StepStatus::Skipped;
                continue;
            }

            let command = step.render(self.workdir.as_deref(), &self.env);
            debug!(step = %step.name, %command, "running step");
            report.started_at = Some(Utc::now());
            let result = channel
                .execute(&command)
                .await
                .map_err(|source: ChannelError| PlanError::Channel {
                    step: step.name.clone(),
                    source,
                })?;

            let passed = step.check.passes(&result);
            if step.capture_timing {
                if let Some(pattern) = &self.timing {
                    report.timings_ms = pattern.extract_timings(&result.stdout);
                }
            }
            if passed && !result.success() {
                warn!(step = %step.name, exit = result.exit_code, "step failed, continuing");
            }
            report.record(result, passed);

            if passed {
                info!(step = %step.name, ms = report.duration_ms, "step completed");
            } else {
                warn!(
                    step = %step.name,
                    exit = ?report.exit_code,
                    stderr = %report.stderr.trim(),
                    "step failed"
                );
                succeeded = false;
            }
        }

        Ok(PlanReport {
            plan: self.name.clone(),
            steps: reports,
            succeeded,
        })
    }
}

/// Builder for [`RemotePlan`].
#[derive(Debug, Clone)]
pub struct RemotePlanBuilder {
    name: String,
    workdir: Option<String>,
    env: Vec<(String, String)>,
    steps: Vec<RemoteStep>,
    timing: Option<TimingPattern>,
}

impl RemotePlanBuilder {
    /// Working directory for steps that do not set their own.
    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Environment variable applied to every step.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn step(mut self, step: RemoteStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = RemoteStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Pattern used for steps flagged with `capture_timing`.
    pub fn timing_pattern(mut self, pattern: TimingPattern) -> Self {
        self.timing = Some(pattern);
        self
    }

    pub fn build(self) -> Result<RemotePlan, PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty { plan: self.name });
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(PlanError::DuplicateStep {
                    plan: self.name.clone(),
                    name: step.name.clone(),
                });
            }
            let bad_name = step
                .env
                .iter()
                .chain(self.env.iter())
                .find(|(k, _)| !shell::is_valid_env_name(k));
            if let Some((name, _)) = bad_name {
                return Err(PlanError::InvalidEnvName {
                    step: step.name.clone(),
                    name: name.clone(),
                });
            }
        }

        Ok(RemotePlan {
            name: self.name,
            workdir: self.workdir,
            env: self.env,
            steps: self.steps,
            timing: self.timing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use crate::remote::{TransferChannel, no_progress};

    #[test]
    fn test_render_merges_plan_defaults() {
        let step = RemoteStep::new("run", "./bin/infer")
            .env("LD_LIBRARY_PATH", "/d/lib:$LD_LIBRARY_PATH")
            .env("MODE", "fast");
        let plan_env = vec![
            ("MODE".to_string(), "slow".to_string()),
            ("ADSP_LIBRARY_PATH".to_string(), "/d/dsp".to_string()),
        ];
        let rendered = step.render(Some("/d"), &plan_env);
        assert!(rendered.starts_with("cd /d && export ADSP_LIBRARY_PATH=/d/dsp && export LD_LIBRARY_PATH="));
        assert!(rendered.ends_with("&& export MODE=fast && ./bin/infer"));
        assert!(!rendered.contains("slow"));
    }

    #[test]
    fn test_compound_step_exports_env_for_every_command() {
        let step = RemoteStep::new("run", "echo build && printenv LD_LIBRARY_PATH")
            .env("LD_LIBRARY_PATH", "/d/lib");
        let rendered = step.render(None, &[]);
        assert_eq!(
            rendered,
            "export LD_LIBRARY_PATH=/d/lib && echo build && printenv LD_LIBRARY_PATH"
        );

        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&rendered)
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "build\n/d/lib\n");
    }

    #[test]
    fn test_step_workdir_wins() {
        let step = RemoteStep::new("build", "make").workdir("/d/build");
        assert_eq!(step.render(Some("/d"), &[]), "cd /d/build && make");
    }

    #[test]
    fn test_builder_validation() {
        assert!(matches!(
            RemotePlan::builder("empty").build(),
            Err(PlanError::Empty { .. })
        ));
        assert!(matches!(
            RemotePlan::builder("dup")
                .step(RemoteStep::new("a", "true"))
                .step(RemoteStep::new("a", "true"))
                .build(),
            Err(PlanError::DuplicateStep { .. })
        ));
        assert!(matches!(
            RemotePlan::builder("env")
                .step(RemoteStep::new("a", "true").env("BAD-NAME", "x"))
                .build(),
            Err(PlanError::InvalidEnvName { .. })
        ));
    }

    #[tokio::test]
    async fn test_stdout_contains_check() {
        let mut device = MockDevice::new();
        let plan = RemotePlan::builder("check")
            .step(RemoteStep::new("hello", "echo hello world").expect_stdout("world"))
            .step(RemoteStep::new("missing", "echo hello").expect_stdout("world"))
            .build()
            .unwrap();
        let report = plan.run(&mut device).await.unwrap();
        assert!(!report.succeeded);
        assert_eq!(report.steps[0].status, StepStatus::Completed);
        assert_eq!(report.failed_step().unwrap().name, "missing");
    }

    #[tokio::test]
    async fn test_transport_error_aborts_plan() {
        let mut device = MockDevice::new();
        device.close_after_uploads(0);
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("x");
        std::fs::write(&local, b"x").unwrap();
        let _ = device.upload(&local, "/x", &mut no_progress()).await;

        let plan = RemotePlan::builder("dead")
            .step(RemoteStep::new("a", "true"))
            .build()
            .unwrap();
        let err = plan.run(&mut device).await.unwrap_err();
        assert!(matches!(err, PlanError::Channel { ref step, .. } if step == "a"));
    }
}
