//! The deployment run command.

use anyhow::{Context, Result};
use deployit_config::{RunConfig, parse_run_config};
use deployit_core::{FsWorkspace, KnownHosts};
use deployit_executor::KdlTemplatePipeline;
use deployit_git::GitSynchronizer;
use deployit_orchestrator::{Collaborators, Orchestrator, RunError, RunResult, Stage};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::keys;

/// Run definition compiled into the binary.
const BUILTIN_CONFIG: &str = include_str!("../../deployit.kdl");

/// Command-line settings that shape a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub verbose: bool,
    pub config: Option<PathBuf>,
    pub sync_timeout: Option<u64>,
    pub execute_timeout: Option<u64>,
    pub known_hosts: Option<PathBuf>,
}

/// Load the run definition and apply command-line overrides.
pub fn load_config(options: &RunOptions) -> Result<RunConfig> {
    let mut config = match &options.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("Failed to load run definition: {}", path.display()))?,
        None => parse_run_config(BUILTIN_CONFIG).context("Built-in run definition is invalid")?,
    };

    config.verbose |= options.verbose;
    if let Some(path) = &options.known_hosts {
        config.known_hosts = Some(path.clone());
    }
    if let Some(secs) = options.sync_timeout {
        config.sync_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(secs) = options.execute_timeout {
        config.execute_timeout = Some(Duration::from_secs(secs));
    }

    config.validate().context("Invalid run settings")?;
    Ok(config)
}

/// Run the deployment and return the process exit code.
pub async fn execute(config: &RunConfig) -> u8 {
    println!("{}", config.name);
    println!();

    let result = run(config).await;
    for line in failure_report(config, &result) {
        println!("{}", line);
    }

    let code = result.exit_code();
    info!(
        run_id = %result.run_id,
        failed_stage = ?result.failed_stage(),
        exit_code = code,
        "Run finished"
    );
    code
}

async fn run(config: &RunConfig) -> RunResult {
    let trust = match &config.known_hosts {
        Some(path) => KnownHosts::at(path),
        None => KnownHosts::new(),
    };
    let credentials = keys::embedded();
    let synchronizer = GitSynchronizer::new();
    let pipeline = KdlTemplatePipeline::new(&config.workspace);
    let workspace = FsWorkspace;

    let collaborators = Collaborators {
        trust: &trust,
        credentials: &credentials,
        synchronizer: &synchronizer,
        pipeline: &pipeline,
        workspace: &workspace,
    };

    Orchestrator::new(config, collaborators).run().await
}

/// Human-readable lines describing what went wrong, if anything.
fn failure_report(config: &RunConfig, result: &RunResult) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(e) = result.error() {
        lines.push(stage_message(config, e));
    }
    if let Err(e) = &result.teardown {
        lines.push(format!("Error: {}", e));
    }
    lines
}

fn stage_message(config: &RunConfig, e: &RunError) -> String {
    let repo_name = |index: usize| {
        config
            .repositories
            .get(index)
            .map(|r| r.name.as_str())
            .unwrap_or("unknown repository")
    };

    let source = &e.source;
    match e.stage {
        // Untrusted host and unreadable trust store both get the hint.
        Stage::VerifyTrust => format!(
            "{}\nPlease call\n     ssh -T git@{} \nto add it to known hosts",
            source, config.host
        ),
        Stage::LoadCredentials(i) => {
            format!("Error: no deploy key for {}: {}", repo_name(i), source)
        }
        // The synchronizer's message is reported as-is.
        Stage::SyncRepo(i) => format!("Update {} failed: {}", repo_name(i), source),
        Stage::ParseTemplate => format!("Error: could not parse template: {}", source),
        Stage::ExecuteSteps => format!("Error: build failed: {}", source),
        Stage::Teardown => format!("Error: {} failed: {}", e.stage, source),
    }
}
