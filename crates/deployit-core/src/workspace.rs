//! Scratch workspace teardown.
//!
//! A run registers a [`WorkspaceGuard`] before its first stage. The guard
//! removes the workspace exactly once: through [`WorkspaceGuard::finish`] on
//! the normal path, or from `Drop` if the run unwinds past it.

use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::error::TeardownError;

/// Removes a workspace directory tree.
pub trait WorkspaceManager: Send + Sync {
    fn teardown(&self, path: &Path) -> Result<(), TeardownError>;
}

/// Removes the workspace from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsWorkspace;

impl WorkspaceManager for FsWorkspace {
    fn teardown(&self, path: &Path) -> Result<(), TeardownError> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Workspace removed");
                Ok(())
            }
            // Nothing was ever synchronized into it.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TeardownError {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Owns the teardown of one workspace for the lifetime of a run.
pub struct WorkspaceGuard<'a> {
    manager: &'a dyn WorkspaceManager,
    path: PathBuf,
    armed: bool,
}

impl<'a> WorkspaceGuard<'a> {
    pub fn register(manager: &'a dyn WorkspaceManager, path: impl Into<PathBuf>) -> Self {
        Self {
            manager,
            path: path.into(),
            armed: true,
        }
    }

    /// Tear the workspace down now and report the outcome.
    pub fn finish(mut self) -> Result<(), TeardownError> {
        self.armed = false;
        self.manager.teardown(&self.path)
    }
}

impl Drop for WorkspaceGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if let Err(e) = self.manager.teardown(&self.path) {
            error!(path = %self.path.display(), error = %e, "Workspace teardown failed during unwind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingManager {
        calls: AtomicUsize,
    }

    impl WorkspaceManager for CountingManager {
        fn teardown(&self, _path: &Path) -> Result<(), TeardownError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_finish_tears_down_once() {
        let manager = CountingManager::default();
        let guard = WorkspaceGuard::register(&manager, "./temp");
        guard.finish().unwrap();
        assert_eq!(manager.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_tears_down_once() {
        let manager = CountingManager::default();
        {
            let _guard = WorkspaceGuard::register(&manager, "./temp");
        }
        assert_eq!(manager.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unwind_tears_down_once() {
        let manager = CountingManager::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = WorkspaceGuard::register(&manager, "./temp");
            panic!("step exploded");
        }));
        assert!(result.is_err());
        assert_eq!(manager.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fs_workspace_removes_tree() {
        let root = tempfile::tempdir().unwrap();
        let workspace = root.path().join("temp");
        std::fs::create_dir_all(workspace.join("repo/.git")).unwrap();
        std::fs::write(workspace.join("repo/file.txt"), "data").unwrap();

        FsWorkspace.teardown(&workspace).unwrap();
        assert!(!workspace.exists());
    }

    #[test]
    fn test_fs_workspace_missing_dir_is_ok() {
        let root = tempfile::tempdir().unwrap();
        FsWorkspace.teardown(&root.path().join("never-created")).unwrap();
    }

    #[test]
    fn test_fs_workspace_reports_failure() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();

        let err = FsWorkspace.teardown(&file).unwrap_err();
        assert_eq!(err.path, file);
    }
}
