//! Repository synchronizer collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::credentials::DeployKey;
use crate::error::SyncError;
use crate::progress::ProgressSink;

/// Result of bringing a local checkout up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Commit the checkout ended up at.
    pub reference: String,
    /// Short human-readable description (`cloned`, `up to date`, ...).
    pub detail: String,
}

impl SyncOutcome {
    pub fn new(reference: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            detail: detail.into(),
        }
    }
}

/// Brings a local path up to date with a remote repository.
#[async_trait]
pub trait RepositorySynchronizer: Send + Sync {
    /// Synchronize `local_path` with `remote` using `key`.
    ///
    /// The key is handed over by value; implementations must not write it to
    /// disk or logs.
    async fn sync(
        &self,
        remote: &str,
        local_path: &Path,
        key: DeployKey,
        passphrase: Option<&str>,
        progress: ProgressSink,
    ) -> Result<SyncOutcome, SyncError>;
}
