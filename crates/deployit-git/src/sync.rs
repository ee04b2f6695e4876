//! Git synchronizer backed by libgit2.
//!
//! A missing checkout is cloned; an existing one is fetched from `origin`
//! and hard-reset to the remote-tracking head of its current branch. The
//! deploy key goes straight from memory into libgit2's SSH credentials.

use async_trait::async_trait;
use deployit_core::{DeployKey, ProgressSink, RepositorySynchronizer, SyncError, SyncOutcome};
use git2::build::RepoBuilder;
use git2::{Cred, FetchOptions, Oid, RemoteCallbacks, Repository, ResetType};
use std::ffi::c_int;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Errors raised while talking to git.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("deploy key is not a PEM private key")]
    InvalidKey,

    #[error("clone failed: {0}")]
    CloneFailed(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("checkout failed: {0}")]
    CheckoutFailed(String),

    #[error("{} tracks {found}, expected {expected}", .path.display())]
    RemoteMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GitError> for SyncError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::InvalidKey => SyncError::InvalidKey,
            GitError::CloneFailed(m) => SyncError::CloneFailed(m),
            GitError::FetchFailed(m) => SyncError::FetchFailed(m),
            GitError::CheckoutFailed(m) => SyncError::CheckoutFailed(m),
            GitError::RemoteMismatch {
                path,
                expected,
                found,
            } => SyncError::RemoteMismatch {
                path,
                expected,
                found,
            },
            GitError::Io(e) => SyncError::Io(e),
        }
    }
}

/// Repository synchronizer using libgit2 over SSH.
#[derive(Debug, Clone)]
pub struct GitSynchronizer {
    /// User for SSH remotes that do not name one.
    default_user: String,
}

impl Default for GitSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl GitSynchronizer {
    pub fn new() -> Self {
        Self {
            default_user: "git".to_string(),
        }
    }
}

/// Bound how long libgit2 waits to connect to a remote and for each read
/// from it, so a stalled server fails the transfer instead of pinning a
/// blocking thread.
///
/// # Safety
///
/// Writes process-wide libgit2 settings without synchronization. Call it
/// before any other thread can be using libgit2.
pub unsafe fn set_transport_timeout(limit: Duration) -> Result<(), git2::Error> {
    let millis = c_int::try_from(limit.as_millis()).unwrap_or(c_int::MAX);
    unsafe {
        git2::opts::set_server_connect_timeout_in_milliseconds(millis)?;
        git2::opts::set_server_timeout_in_milliseconds(millis)?;
    }
    debug!(timeout_ms = millis, "Configured git transport timeouts");
    Ok(())
}

/// Raises the cancel flag when the awaiting future is dropped, which makes
/// the next libgit2 progress callback abort the transfer.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl RepositorySynchronizer for GitSynchronizer {
    async fn sync(
        &self,
        remote: &str,
        local_path: &Path,
        key: DeployKey,
        passphrase: Option<&str>,
        progress: ProgressSink,
    ) -> Result<SyncOutcome, SyncError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let guard = CancelOnDrop(cancel.clone());

        let job = SyncJob {
            remote: remote.to_string(),
            path: local_path.to_path_buf(),
            user: self.default_user.clone(),
            key,
            passphrase: passphrase.map(str::to_string),
            progress,
            cancel,
        };

        let result = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?;
        drop(guard);

        Ok(result?)
    }
}

struct SyncJob {
    remote: String,
    path: PathBuf,
    user: String,
    key: DeployKey,
    passphrase: Option<String>,
    progress: ProgressSink,
    cancel: Arc<AtomicBool>,
}

impl SyncJob {
    fn run(&self) -> Result<SyncOutcome, GitError> {
        let key = std::str::from_utf8(self.key.expose())
            .ok()
            .filter(|k| k.trim_start().starts_with("-----BEGIN"))
            .ok_or(GitError::InvalidKey)?;

        if self.path.join(".git").exists() {
            self.update(key)
        } else {
            self.initial_clone(key)
        }
    }

    fn fetch_options<'a>(&'a self, key: &'a str) -> FetchOptions<'a> {
        let mut callbacks = RemoteCallbacks::new();

        let mut attempts = 0;
        callbacks.credentials(move |_url, username, _allowed| {
            attempts += 1;
            // libgit2 keeps asking while the server rejects the key.
            if attempts > 1 {
                return Err(git2::Error::from_str("deploy key rejected by remote"));
            }
            Cred::ssh_key_from_memory(
                username.unwrap_or(self.user.as_str()),
                None,
                key,
                self.passphrase.as_deref(),
            )
        });

        let mut writer = self.progress.writer();
        let mut last_percent = None;
        callbacks.transfer_progress(move |stats| {
            if self.cancel.load(Ordering::Relaxed) {
                return false;
            }
            let received = stats.received_objects();
            let total = stats.total_objects();
            if let Some(percent) = (received * 100).checked_div(total) {
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    let _ = writeln!(
                        writer,
                        "Receiving objects: {:3}% ({}/{})",
                        percent, received, total
                    );
                }
            }
            true
        });

        let mut sideband = self.progress.writer();
        callbacks.sideband_progress(move |data| {
            let _ = sideband.write_all(data);
            !self.cancel.load(Ordering::Relaxed)
        });

        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        options
    }

    fn initial_clone(&self, key: &str) -> Result<SyncOutcome, GitError> {
        info!(
            remote = %self.remote,
            path = %self.path.display(),
            key = %self.key.fingerprint(),
            "Cloning repository"
        );

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let repo = RepoBuilder::new()
            .fetch_options(self.fetch_options(key))
            .clone(&self.remote, &self.path)
            .map_err(|e| GitError::CloneFailed(format!("{}: {}", self.remote, e.message())))?;

        let head = head_id(&repo).map_err(|e| GitError::CloneFailed(e.message().to_string()))?;
        Ok(SyncOutcome::new(head.to_string(), "cloned"))
    }

    fn update(&self, key: &str) -> Result<SyncOutcome, GitError> {
        info!(
            remote = %self.remote,
            path = %self.path.display(),
            key = %self.key.fingerprint(),
            "Updating repository"
        );

        let fetch_err =
            |e: git2::Error| GitError::FetchFailed(format!("{}: {}", self.remote, e.message()));
        let checkout_err = |e: git2::Error| GitError::CheckoutFailed(e.message().to_string());

        let repo = Repository::open(&self.path).map_err(fetch_err)?;
        let before = head_id(&repo).ok();

        {
            let mut origin = repo.find_remote("origin").map_err(fetch_err)?;
            let found = origin.url().unwrap_or_default();
            if found != self.remote {
                return Err(GitError::RemoteMismatch {
                    path: self.path.clone(),
                    expected: self.remote.clone(),
                    found: found.to_string(),
                });
            }
            let mut options = self.fetch_options(key);
            origin
                .fetch(&[] as &[&str], Some(&mut options), None)
                .map_err(fetch_err)?;
        }

        let upstream = match repo.head() {
            Ok(head) if head.is_branch() => {
                let branch = head.shorthand().unwrap_or_default().to_string();
                format!("refs/remotes/origin/{}", branch)
            }
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "Checkout is not on a branch, using FETCH_HEAD");
                "FETCH_HEAD".to_string()
            }
        };
        let target = repo.refname_to_id(&upstream).map_err(checkout_err)?;
        let object = repo.find_object(target, None).map_err(checkout_err)?;
        repo.reset(&object, ResetType::Hard, None).map_err(checkout_err)?;

        debug!(upstream = %upstream, target = %target, "Reset checkout");

        let detail = match before {
            Some(old) if old == target => "up to date".to_string(),
            Some(old) => format!("updated {}..{}", short(old), short(target)),
            None => "updated".to_string(),
        };
        Ok(SyncOutcome::new(target.to_string(), detail))
    }
}

fn head_id(repo: &Repository) -> Result<Oid, git2::Error> {
    repo.head()?.peel_to_commit().map(|c| c.id())
}

fn short(id: Oid) -> String {
    id.to_string().chars().take(7).collect()
}
