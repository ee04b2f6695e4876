//! Error types for each stage of a deployment run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::progress::format_elapsed;

/// The known-hosts trust store could not be consulted.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("home directory could not be determined")]
    HomeDirUnavailable,

    #[error("failed to read known hosts file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no embedded deploy key named '{0}'")]
    KeyNotFound(String),
}

/// Failure reported by a repository synchronizer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("deploy key is not a valid PEM private key")]
    InvalidKey,

    #[error("clone failed: {0}")]
    CloneFailed(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("checkout failed: {0}")]
    CheckoutFailed(String),

    /// The existing checkout tracks a different remote than requested.
    #[error("{} tracks {found}, expected {expected}", .path.display())]
    RemoteMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("synchronization timed out after {}", timeout(.0))]
    TimedOut(Duration),

    #[error("synchronization task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The template or data file could not be turned into a step sequence.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid template {}: {message}", .path.display())]
    Template { path: PathBuf, message: String },

    #[error("invalid data file {}: {message}", .path.display())]
    Data { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("step '{step}' could not be started: {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    /// `stderr` holds the last lines the step wrote when they were not
    /// already streamed to the operator.
    #[error("step '{step}' failed ({status}){}", stderr_suffix(.stderr))]
    Failed {
        step: String,
        status: String,
        stderr: Vec<String>,
    },

    #[error("step '{step}' failed: {source}")]
    Io {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build steps timed out after {}", timeout(.0))]
    TimedOut(Duration),
}

fn timeout(limit: &Duration) -> String {
    format_elapsed(*limit)
}

fn stderr_suffix(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!(":\n{}", lines.join("\n"))
    }
}

#[derive(Debug, Error)]
#[error("failed to remove workspace {}: {source}", .path.display())]
pub struct TeardownError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_keep_sub_second_precision() {
        let sync = SyncError::TimedOut(Duration::from_millis(250));
        assert_eq!(sync.to_string(), "synchronization timed out after 250ms");

        let execute = ExecuteError::TimedOut(Duration::from_secs(90));
        assert_eq!(execute.to_string(), "build steps timed out after 1m30s");
    }

    #[test]
    fn test_failed_step_lists_stderr_tail() {
        let err = ExecuteError::Failed {
            step: "build".to_string(),
            status: "exit status: 2".to_string(),
            stderr: vec!["make: *** missing target".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "step 'build' failed (exit status: 2):\nmake: *** missing target"
        );
    }
}
