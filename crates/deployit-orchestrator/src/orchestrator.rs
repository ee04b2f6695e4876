//! Run orchestrator - executes the deployment stages in order.
//!
//! VerifyTrust → LoadCredentials → SyncRepo(i)… → ParseTemplate →
//! ExecuteSteps → Teardown. Each stage is terminal on failure; teardown runs
//! on every path, including a panic inside any stage.

use deployit_config::RunConfig;
use deployit_core::progress::{format_elapsed, status_line};
use deployit_core::{
    CredentialLoader, DeployKey, ExecuteError, ProgressSink, RepositorySynchronizer, RunId,
    SyncError, TemplatePipeline, TrustVerifier, WorkspaceGuard, WorkspaceManager,
};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{Instrument, error, info, info_span};

use crate::outcome::{RunError, RunResult, RunStatus, Stage, StageError};

/// The collaborators a run talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub trust: &'a dyn TrustVerifier,
    pub credentials: &'a dyn CredentialLoader,
    pub synchronizer: &'a dyn RepositorySynchronizer,
    pub pipeline: &'a dyn TemplatePipeline,
    pub workspace: &'a dyn WorkspaceManager,
}

/// Orchestrates one deployment run.
pub struct Orchestrator<'a> {
    config: &'a RunConfig,
    collaborators: Collaborators<'a>,
    /// Where status lines (`Update <repo> ... OK`, `Time: ...`) go.
    status: ProgressSink,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a RunConfig, collaborators: Collaborators<'a>) -> Self {
        Self {
            config,
            collaborators,
            status: ProgressSink::Stdout,
        }
    }

    pub fn with_status_sink(mut self, status: ProgressSink) -> Self {
        self.status = status;
        self
    }

    /// Execute the run. Never panics; every outcome is in the result.
    pub async fn run(&self) -> RunResult {
        let run_id = RunId::new();
        let span = info_span!("run", run_id = %run_id, name = %self.config.name);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: RunId) -> RunResult {
        let guard = WorkspaceGuard::register(self.collaborators.workspace, &self.config.workspace);

        let mut stage = Stage::VerifyTrust;
        let outcome = AssertUnwindSafe(self.stages(&mut stage)).catch_unwind().await;

        let status = match outcome {
            Ok(Ok(elapsed)) => RunStatus::Succeeded { elapsed },
            Ok(Err(source)) => RunStatus::Failed(RunError { stage, source }),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(stage = %stage, panic = %message, "Stage panicked");
                RunStatus::Failed(RunError {
                    stage,
                    source: StageError::Panic(message),
                })
            }
        };

        if let RunStatus::Failed(e) = &status {
            error!(stage = %e.stage, error = %e.source, "Run failed");
        }

        let teardown = guard.finish();
        match &teardown {
            Ok(()) => self.report("Removing workspace", "OK"),
            Err(e) => error!(error = %e, "Workspace teardown failed"),
        }

        RunResult {
            run_id,
            status,
            teardown,
        }
    }

    /// Every stage up to and including ExecuteSteps. `stage` always names the
    /// stage in progress so a failure or panic can be attributed to it.
    async fn stages(&self, stage: &mut Stage) -> Result<Duration, StageError> {
        let config = self.config;
        let c = &self.collaborators;
        let progress = ProgressSink::for_verbosity(config.verbose);

        *stage = Stage::VerifyTrust;
        if !c.trust.verify(&config.host)? {
            return Err(StageError::Untrusted {
                host: config.host.clone(),
            });
        }
        info!(host = %config.host, "Host is trusted");

        let mut keys: Vec<DeployKey> = Vec::with_capacity(config.repositories.len());
        for (index, repo) in config.repositories.iter().enumerate() {
            *stage = Stage::LoadCredentials(index);
            let key = c.credentials.load(&repo.key)?;
            info!(
                repository = %repo.name,
                key = %repo.key,
                fingerprint = %key.fingerprint(),
                "Loaded deploy key"
            );
            keys.push(key);
        }

        for (index, (repo, key)) in config.repositories.iter().zip(keys).enumerate() {
            *stage = Stage::SyncRepo(index);
            info!(repository = %repo.name, remote = %repo.remote, "Synchronizing repository");
            let sync = c.synchronizer.sync(
                &repo.remote,
                &repo.path,
                key,
                repo.passphrase.as_deref(),
                progress,
            );
            let outcome = bounded(config.sync_timeout, sync, SyncError::TimedOut).await?;
            info!(
                repository = %repo.name,
                reference = %outcome.reference,
                detail = %outcome.detail,
                "Repository synchronized"
            );
            self.report(&format!("Update {}", repo.name), "OK");
        }

        *stage = Stage::ParseTemplate;
        let steps = c.pipeline.parse(&config.template, &config.data)?;
        info!(template = %config.template.display(), steps = steps.len(), "Template parsed");

        *stage = Stage::ExecuteSteps;
        let start = Instant::now();
        bounded(
            config.execute_timeout,
            steps.execute(progress, config.verbose),
            ExecuteError::TimedOut,
        )
        .await?;
        let elapsed = start.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "Build steps completed");
        self.report_line(&format!("Time: {}", format_elapsed(elapsed)));

        Ok(elapsed)
    }

    fn report(&self, label: &str, status: &str) {
        self.report_line(&status_line(label, status));
    }

    fn report_line(&self, line: &str) {
        let _ = writeln!(self.status.writer(), "{}", line);
    }
}

/// Await `fut`, giving up after `limit` if one is set.
async fn bounded<T, E, F>(
    limit: Option<Duration>,
    fut: F,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit)),
        },
        None => fut.await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
