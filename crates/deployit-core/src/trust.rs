//! Host trust verification against the operator's known-hosts file.

use std::path::PathBuf;
use tracing::debug;

use crate::error::TrustError;

/// Decides whether a remote host has been verified before.
pub trait TrustVerifier: Send + Sync {
    /// `Ok(false)` means the store was read and the host is absent; an error
    /// means the store could not be consulted at all.
    fn verify(&self, host: &str) -> Result<bool, TrustError>;
}

/// The OpenSSH `known_hosts` file.
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    /// Explicit location; `None` means `~/.ssh/known_hosts`.
    path: Option<PathBuf>,
}

impl KnownHosts {
    /// Use the operator's default known-hosts file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific known-hosts file.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// `~/.ssh/known_hosts`, if the home directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
    }

    fn resolve(&self) -> Result<PathBuf, TrustError> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Self::default_path().ok_or(TrustError::HomeDirUnavailable),
        }
    }
}

impl TrustVerifier for KnownHosts {
    fn verify(&self, host: &str) -> Result<bool, TrustError> {
        let path = self.resolve()?;
        let contents = std::fs::read(&path).map_err(|source| TrustError::Read {
            path: path.clone(),
            source,
        })?;

        // An empty host would match any store.
        if host.is_empty() {
            return Ok(false);
        }

        let trusted = String::from_utf8_lossy(&contents).contains(host);
        debug!(host = %host, path = %path.display(), trusted, "Checked known hosts");
        Ok(trusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_listed_host_is_trusted() {
        let file = store("github.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl\n");
        let hosts = KnownHosts::at(file.path());
        assert!(hosts.verify("github.com").unwrap());
    }

    #[test]
    fn test_empty_store_is_not_trusted() {
        let file = store("");
        let hosts = KnownHosts::at(file.path());
        assert!(!hosts.verify("github.com").unwrap());
    }

    #[test]
    fn test_other_hosts_are_not_trusted() {
        let file = store("gitlab.com ssh-ed25519 AAAA\nbitbucket.org ssh-rsa AAAA\n");
        let hosts = KnownHosts::at(file.path());
        assert!(!hosts.verify("github.com").unwrap());
        assert!(hosts.verify("gitlab.com").unwrap());
    }

    #[test]
    fn test_missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = KnownHosts::at(dir.path().join("known_hosts"));
        let err = hosts.verify("github.com").unwrap_err();
        assert!(matches!(err, TrustError::Read { .. }));
    }

    #[test]
    fn test_empty_host_never_matches() {
        let file = store("github.com ssh-ed25519 AAAA\n");
        let hosts = KnownHosts::at(file.path());
        assert!(!hosts.verify("").unwrap());
    }
}
