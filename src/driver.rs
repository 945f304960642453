//! Script driver
//!
//! Loads script files into a `Sandbox` and keeps calling `run()` until each script
//! closes, sleeping between calls. Scripts can be driven one after another or
//! interleaved round-robin, which shows the supervisors sharing one host thread.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::sandbox::{Sandbox, ScriptValue, Supervisor, ThreadState};

/// Final outcome of driving one script
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptReport {
    pub name: String,
    pub state: ThreadState,
    pub run_count: u64,
    pub instructions: u64,
    pub results: Option<Vec<ScriptValue>>,
}

impl ScriptReport {
    fn from_supervisor(supervisor: &Supervisor) -> Self {
        Self {
            name: supervisor.name().to_string(),
            state: supervisor.state(),
            run_count: supervisor.run_count(),
            instructions: supervisor.instruction_count(),
            results: supervisor.results(),
        }
    }
}

/// Script name derived from a file path (`scripts/hello.lua` -> `hello`)
pub fn script_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn read_script(path: &Path) -> Result<(String, String)> {
    let code = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    Ok((script_name(path), code))
}

/// Load one script and drive it until its thread closes
pub async fn run_script(
    sandbox: &Sandbox,
    name: &str,
    code: &str,
    stagger: Duration,
) -> Result<ScriptReport> {
    info!(script = %name, "Initializing script");
    let supervisor = sandbox.load_code(code, name)?;

    while !supervisor.is_closed() {
        info!(script = %name, run_count = supervisor.run_count(), "Running script");
        let results = supervisor.run().await?;
        info!(script = %name, state = %supervisor.state(), "Results: {}", format_results(&results));

        if !supervisor.is_closed() {
            tokio::time::sleep(stagger).await;
        }
    }

    Ok(ScriptReport::from_supervisor(&supervisor))
}

/// Drive each file to completion, in order
///
/// A file that cannot be read or compiled is reported and does not stop the rest.
pub async fn run_files(
    sandbox: &Sandbox,
    paths: &[PathBuf],
    stagger: Duration,
) -> Vec<(PathBuf, Result<ScriptReport>)> {
    let mut reports = Vec::with_capacity(paths.len());

    for path in paths {
        let outcome = match read_script(path) {
            Ok((name, code)) => run_script(sandbox, &name, &code, stagger).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            warn!(path = %path.display(), "Script failed: {:#}", err);
        }
        reports.push((path.clone(), outcome));
    }

    reports
}

/// Load every script up front, then give each open one a `run()` per round
///
/// Scripts that fail to load are skipped and logged.
pub async fn run_interleaved(
    sandbox: &Sandbox,
    scripts: &[(String, String)],
    stagger: Duration,
) -> Vec<ScriptReport> {
    let mut supervisors = Vec::with_capacity(scripts.len());
    for (name, code) in scripts {
        match sandbox.load_code(code, name) {
            Ok(supervisor) => supervisors.push(supervisor),
            Err(err) => warn!(script = %name, "Failed to load script: {}", err),
        }
    }

    let mut round = 0u64;
    while supervisors.iter().any(|s| !s.is_closed()) {
        round += 1;
        for supervisor in supervisors.iter().filter(|s| !s.is_closed()) {
            match supervisor.run().await {
                Ok(results) => info!(
                    script = %supervisor.name(),
                    round,
                    state = %supervisor.state(),
                    "Results: {}",
                    format_results(&results)
                ),
                Err(err) => warn!(script = %supervisor.name(), "Run rejected: {}", err),
            }
        }
        if supervisors.iter().any(|s| !s.is_closed()) {
            tokio::time::sleep(stagger).await;
        }
    }

    supervisors.iter().map(ScriptReport::from_supervisor).collect()
}

pub fn format_results(results: &Option<Vec<ScriptValue>>) -> String {
    match results {
        None => "undefined".to_string(),
        Some(values) => values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
    }
}
