//! `edgesync run`: one ad-hoc remote step.

use super::helpers::print_json;
use anyhow::{Context, Result};
use edgesync_common::{CommandChannel, EdgeSyncConfig, RemotePlan, RemoteStep};

pub async fn run<C: CommandChannel>(
    session: &mut C,
    config: &EdgeSyncConfig,
    workdir: Option<String>,
    timing: bool,
    command: &[String],
    json: bool,
) -> Result<bool> {
    let plan = build_plan(config, workdir, timing, command)?;
    let report = plan.run(session).await.context("remote command aborted")?;

    if json {
        print_json(&report)?;
        return Ok(report.succeeded);
    }

    if let Some(step) = report.steps.first() {
        print!("{}", step.stdout);
        eprint!("{}", step.stderr);
        if let Some(code) = step.exit_code.filter(|c| *c != 0) {
            eprintln!("exit status {code}");
        }
    }
    if let Some(summary) = report.timing_summary() {
        println!("timing: {summary}");
    }
    Ok(report.succeeded)
}

fn build_plan(
    config: &EdgeSyncConfig,
    workdir: Option<String>,
    timing: bool,
    command: &[String],
) -> Result<RemotePlan> {
    let workdir = match workdir {
        Some(dir) => config.resolve_remote(&dir),
        None => config.device.remote_base.clone(),
    };
    let mut step = RemoteStep::new("run", command.join(" "));
    if timing {
        step = step.capture_timing();
    }

    let mut builder = RemotePlan::builder("run").workdir(workdir);
    for (k, v) in &config.plan.env {
        builder = builder.env(k.clone(), v.clone());
    }
    if timing {
        builder = builder.timing_pattern(config.timing_pattern()?);
    }
    Ok(builder.step(step).build()?)
}
