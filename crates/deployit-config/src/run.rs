//! Run definition parsing.
//!
//! A run definition names the trusted host, the scratch workspace, the
//! repositories to synchronize (in order) and the template/data pair that
//! produces the build steps.
//!
//! ```kdl
//! run "KW Mission Builder"
//! host "github.com"
//! workspace "./temp"
//!
//! repository "kw-bem-missions" {
//!     remote "git@github.com:kdo-wildsau/kw-bem-missions.git"
//!     path "./temp/kw-bem-missions"
//!     key "id_BasicMissions"
//! }
//!
//! template "./temp/kw-bem-missions/kw_bem_make.template.kdl"
//! data "./temp/kw-bem-missions/kw_bem_make.data.kdl"
//! ```

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::nodes::{get_first_integer_arg, get_first_string_arg, require_string_arg};
use crate::{ConfigError, ConfigResult};

/// Upper bound on repositories; each one owns a block of exit codes.
pub const MAX_REPOSITORIES: usize = 10;

/// Everything a single run needs. Built once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Display name, printed as the run header and by `--version`.
    pub name: String,
    /// Host that must be present in the known-hosts file.
    pub host: String,
    /// Scratch directory removed at the end of every run.
    pub workspace: PathBuf,
    /// Repositories synchronized in declaration order.
    pub repositories: Vec<RepositorySpec>,
    pub template: PathBuf,
    pub data: PathBuf,
    /// Overrides `~/.ssh/known_hosts`.
    pub known_hosts: Option<PathBuf>,
    pub sync_timeout: Option<Duration>,
    pub execute_timeout: Option<Duration>,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySpec {
    pub name: String,
    pub remote: String,
    /// Local checkout, inside the workspace.
    pub path: PathBuf,
    /// Identifier of the embedded deploy key.
    pub key: String,
    pub passphrase: Option<String>,
}

impl RunConfig {
    /// Read and validate a run definition file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        parse_run_config(&text)
    }

    /// Check the invariants the orchestrator relies on.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("run name".to_string()));
        }
        if self.host.is_empty() {
            return Err(ConfigError::MissingField("host".to_string()));
        }
        if self.workspace.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("workspace".to_string()));
        }
        if self.repositories.is_empty() {
            return Err(ConfigError::MissingField("repository".to_string()));
        }
        if self.repositories.len() > MAX_REPOSITORIES {
            return Err(ConfigError::InvalidValue {
                field: "repository".to_string(),
                message: format!(
                    "{} repositories declared, at most {} are supported",
                    self.repositories.len(),
                    MAX_REPOSITORIES
                ),
            });
        }

        let workspace = self.validate_workspace()?;
        let mut names = HashSet::new();
        let mut checkouts: Vec<(&str, PathBuf)> = Vec::with_capacity(self.repositories.len());
        for repo in &self.repositories {
            if !names.insert(repo.name.as_str()) {
                return Err(ConfigError::Duplicate(format!("repository '{}'", repo.name)));
            }
            let path = normalize(&repo.path);
            if path == workspace || !path.starts_with(&workspace) {
                return Err(ConfigError::InvalidValue {
                    field: format!("path of repository '{}'", repo.name),
                    message: format!(
                        "{} is not inside workspace {}",
                        repo.path.display(),
                        self.workspace.display()
                    ),
                });
            }
            // Each repository needs a checkout of its own.
            if let Some((other, _)) = checkouts
                .iter()
                .find(|(_, seen)| seen.starts_with(&path) || path.starts_with(seen))
            {
                return Err(ConfigError::InvalidValue {
                    field: format!("path of repository '{}'", repo.name),
                    message: format!(
                        "{} overlaps the checkout of repository '{}'",
                        repo.path.display(),
                        other
                    ),
                });
            }
            checkouts.push((repo.name.as_str(), path));
        }

        for (field, timeout) in [
            ("sync-timeout", self.sync_timeout),
            ("execute-timeout", self.execute_timeout),
        ] {
            if timeout.is_some_and(|t| t.is_zero()) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be at least one second".to_string(),
                });
            }
        }

        Ok(())
    }

    /// The workspace is removed recursively at the end of every run, so it
    /// must be a proper subdirectory of the current directory.
    fn validate_workspace(&self) -> ConfigResult<PathBuf> {
        let invalid = |message: &str| ConfigError::InvalidValue {
            field: "workspace".to_string(),
            message: format!("{}: {}", self.workspace.display(), message),
        };

        if self.workspace.is_absolute() || self.workspace.has_root() {
            return Err(invalid("must be a relative path"));
        }
        if self
            .workspace
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(invalid("must not contain '..'"));
        }
        let workspace = normalize(&self.workspace);
        if workspace.as_os_str().is_empty() {
            return Err(invalid("must name a subdirectory of the current directory"));
        }
        Ok(workspace)
    }
}

/// Parse and validate a run definition from KDL text.
pub fn parse_run_config(kdl: &str) -> ConfigResult<RunConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = None;
    let mut host = None;
    let mut workspace = None;
    let mut repositories = Vec::new();
    let mut template = None;
    let mut data = None;
    let mut known_hosts = None;
    let mut sync_timeout = None;
    let mut execute_timeout = None;

    for node in doc.nodes() {
        match node.name().value() {
            "run" => name = Some(require_string_arg(node, "run name")?),
            "host" => host = Some(require_string_arg(node, "host")?),
            "workspace" => workspace = Some(PathBuf::from(require_string_arg(node, "workspace")?)),
            "repository" => repositories.push(parse_repository(node)?),
            "template" => template = Some(PathBuf::from(require_string_arg(node, "template")?)),
            "data" => data = Some(PathBuf::from(require_string_arg(node, "data")?)),
            "known-hosts" => {
                known_hosts = Some(PathBuf::from(require_string_arg(node, "known-hosts")?))
            }
            "sync-timeout" => sync_timeout = Some(parse_seconds(node, "sync-timeout")?),
            "execute-timeout" => execute_timeout = Some(parse_seconds(node, "execute-timeout")?),
            other => return Err(ConfigError::UnknownNode(other.to_string())),
        }
    }

    let config = RunConfig {
        name: name.ok_or_else(|| ConfigError::MissingField("run name".to_string()))?,
        host: host.ok_or_else(|| ConfigError::MissingField("host".to_string()))?,
        workspace: workspace.ok_or_else(|| ConfigError::MissingField("workspace".to_string()))?,
        repositories,
        template: template.ok_or_else(|| ConfigError::MissingField("template".to_string()))?,
        data: data.ok_or_else(|| ConfigError::MissingField("data".to_string()))?,
        known_hosts,
        sync_timeout,
        execute_timeout,
        verbose: false,
    };
    config.validate()?;
    Ok(config)
}

fn parse_repository(node: &KdlNode) -> ConfigResult<RepositorySpec> {
    let name = require_string_arg(node, "repository name")?;

    let mut remote = None;
    let mut path = None;
    let mut key = None;
    let mut passphrase = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "remote" => remote = get_first_string_arg(child),
                "path" => path = get_first_string_arg(child).map(PathBuf::from),
                "key" => key = get_first_string_arg(child),
                "passphrase" => passphrase = get_first_string_arg(child),
                other => {
                    return Err(ConfigError::UnknownNode(format!("repository.{}", other)));
                }
            }
        }
    }

    let missing = |field: &str| ConfigError::MissingField(format!("{} for repository '{}'", field, name));
    Ok(RepositorySpec {
        remote: remote.filter(|s| !s.is_empty()).ok_or_else(|| missing("remote"))?,
        path: path.ok_or_else(|| missing("path"))?,
        key: key.filter(|s| !s.is_empty()).ok_or_else(|| missing("key"))?,
        passphrase: passphrase.filter(|s| !s.is_empty()),
        name,
    })
}

fn parse_seconds(node: &KdlNode, field: &str) -> ConfigResult<Duration> {
    let value = get_first_integer_arg(node).ok_or_else(|| ConfigError::InvalidValue {
        field: field.to_string(),
        message: "expected a number of seconds".to_string(),
    })?;
    let secs = u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{} is not a valid number of seconds", value),
    })?;
    Ok(Duration::from_secs(secs))
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}
