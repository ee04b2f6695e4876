//! Stages, exit codes and the result of a run.

use derive_more::Display;
use deployit_core::{
    CredentialError, ExecuteError, ParseError, RunId, SyncError, TeardownError, TrustError,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const EXIT_SUCCESS: u8 = 0;
/// Configuration or start-up failure before any stage ran.
pub const EXIT_INTERNAL: u8 = 1;
pub const EXIT_TRUST: u8 = 2;
/// Missing deploy key for the first repository.
pub const EXIT_KEY_FIRST: u8 = 3;
/// Sync failure of the first repository; the second one gets the next code.
pub const EXIT_SYNC_FIRST: u8 = 4;
/// Plus the zero-based index, for keys of repositories after the first.
pub const EXIT_KEY_BASE: u8 = 10;
/// Plus the zero-based index, for syncs of repositories after the second.
pub const EXIT_SYNC_BASE: u8 = 20;
pub const EXIT_PARSE: u8 = 30;
pub const EXIT_EXECUTE: u8 = 31;
pub const EXIT_TEARDOWN: u8 = 32;
/// Command-line usage error.
pub const EXIT_USAGE: u8 = 64;

/// A step of the run state machine. Repository indices are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Stage {
    #[display("verify trust")]
    VerifyTrust,
    #[display("load credentials for repository {}", _0 + 1)]
    LoadCredentials(usize),
    #[display("sync repository {}", _0 + 1)]
    SyncRepo(usize),
    #[display("parse template")]
    ParseTemplate,
    #[display("execute steps")]
    ExecuteSteps,
    #[display("teardown")]
    Teardown,
}

impl Stage {
    /// Process exit code reported when this stage fails.
    pub fn exit_code(&self) -> u8 {
        match self {
            Stage::VerifyTrust => EXIT_TRUST,
            Stage::LoadCredentials(0) => EXIT_KEY_FIRST,
            Stage::LoadCredentials(i) => EXIT_KEY_BASE + index_offset(*i),
            Stage::SyncRepo(i @ (0 | 1)) => EXIT_SYNC_FIRST + *i as u8,
            Stage::SyncRepo(i) => EXIT_SYNC_BASE + index_offset(*i),
            Stage::ParseTemplate => EXIT_PARSE,
            Stage::ExecuteSteps => EXIT_EXECUTE,
            Stage::Teardown => EXIT_TEARDOWN,
        }
    }
}

// Run configurations hold at most ten repositories; clamp so a bad index can
// never bleed into the next code block.
fn index_offset(index: usize) -> u8 {
    index.min(9) as u8
}

/// What went wrong inside a stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{host} is not present in your known hosts file!")]
    Untrusted { host: String },

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error("panicked: {0}")]
    Panic(String),
}

/// A stage failure; ends the run.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct RunError {
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        self.stage.exit_code()
    }
}

#[derive(Debug)]
pub enum RunStatus {
    /// `elapsed` covers the build-step phase only.
    Succeeded { elapsed: Duration },
    Failed(RunError),
}

/// Outcome of one run. Consumed once to pick the exit code.
#[derive(Debug)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    pub teardown: Result<(), TeardownError>,
}

impl RunResult {
    /// The stage that decides the exit code. A failed stage wins over a
    /// teardown failure; teardown only counts after an otherwise clean run.
    pub fn failed_stage(&self) -> Option<Stage> {
        match (&self.status, &self.teardown) {
            (RunStatus::Failed(e), _) => Some(e.stage),
            (RunStatus::Succeeded { .. }, Err(_)) => Some(Stage::Teardown),
            (RunStatus::Succeeded { .. }, Ok(())) => None,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.failed_stage().map_or(EXIT_SUCCESS, |stage| stage.exit_code())
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == EXIT_SUCCESS
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match &self.status {
            RunStatus::Succeeded { elapsed } => Some(*elapsed),
            RunStatus::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RunError> {
        match &self.status {
            RunStatus::Failed(e) => Some(e),
            RunStatus::Succeeded { .. } => None,
        }
    }
}
