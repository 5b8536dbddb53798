//! `edgesync probe`: is the device reachable and ready?

use super::helpers::print_json;
use anyhow::{Context, Result};
use edgesync_common::remote::probe::{free_space_mb, locate, remote_dir_exists};
use edgesync_common::{CommandChannel, EdgeSyncConfig};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub destination: String,
    pub system: String,
    pub round_trip_ms: u64,
    pub remote_base: String,
    pub remote_base_exists: bool,
    pub free_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchResult>,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub name: String,
    pub roots: Vec<String>,
    pub found: Option<String>,
}

pub async fn run<C: CommandChannel>(
    session: &mut C,
    config: &EdgeSyncConfig,
    name: Option<&str>,
    roots: &[String],
    json: bool,
) -> Result<bool> {
    let uname = session.execute("uname -srm").await.context("device did not answer")?;
    let base = config.device.remote_base.clone();
    let remote_base_exists = remote_dir_exists(session, &base).await?;
    let free_mb = if remote_base_exists {
        free_space_mb(session, &base).await?
    } else {
        None
    };

    let search = match name {
        Some(name) => {
            let roots = search_roots(config, roots);
            let found = locate(session, &roots, name).await?;
            Some(SearchResult {
                name: name.to_string(),
                roots,
                found,
            })
        }
        None => None,
    };

    let report = ProbeReport {
        destination: config.device.destination(),
        system: uname.stdout.trim().to_string(),
        round_trip_ms: uname.duration.as_millis() as u64,
        remote_base: base,
        remote_base_exists,
        free_mb,
        search,
    };

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(report.search.as_ref().is_none_or(|s| s.found.is_some()))
}

fn search_roots(config: &EdgeSyncConfig, roots: &[String]) -> Vec<String> {
    if roots.is_empty() {
        vec![config.device.remote_base.clone()]
    } else {
        roots.iter().map(|r| config.resolve_remote(r)).collect()
    }
}

fn print_report(report: &ProbeReport) {
    println!("device:      {} ({})", report.destination, report.system);
    println!("round trip:  {} ms", report.round_trip_ms);
    let base_state = if report.remote_base_exists {
        "present"
    } else {
        "missing"
    };
    println!("remote base: {} ({base_state})", report.remote_base);
    if let Some(mb) = report.free_mb {
        println!("free space:  {mb} MiB");
    }
    if let Some(search) = &report.search {
        match &search.found {
            Some(path) => println!("found:       {path}"),
            None => println!("not found:   {} under {}", search.name, search.roots.join(", ")),
        }
    }
}
