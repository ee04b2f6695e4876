//! Local step execution.
//!
//! Steps run on the host in declaration order. `run` steps go through
//! `sh -c`; file actions are performed directly with tokio's filesystem API.

use async_recursion::async_recursion;
use async_trait::async_trait;
use deployit_config::{Step, StepAction, StepTemplate};
use deployit_core::progress::status_line;
use deployit_core::{ExecuteError, ProgressSink, StepSequence};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

/// Stderr lines kept for the error report of a failed step.
const STDERR_TAIL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Stdout,
    Stderr,
}

/// Executes rendered template steps on the local machine.
#[derive(Debug, Clone)]
pub struct LocalStepSequence {
    name: String,
    steps: Vec<Step>,
    env: Vec<(String, String)>,
    /// Base for relative paths and the default working directory.
    base_dir: PathBuf,
}

impl LocalStepSequence {
    pub fn new(template: StepTemplate, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: template.name,
            steps: template.steps,
            env: template.env,
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    async fn run_step(
        &self,
        step: &Step,
        progress: ProgressSink,
        verbose: bool,
    ) -> Result<(), ExecuteError> {
        let io_err = |source: std::io::Error| ExecuteError::Io {
            step: step.name.clone(),
            source,
        };

        match &step.action {
            StepAction::Run { commands } => {
                self.run_commands(step, commands, progress, verbose).await
            }
            StepAction::Copy { from, to } => copy_path(&self.resolve(from), &self.resolve(to))
                .await
                .map_err(io_err),
            StepAction::Mkdir { path } => tokio::fs::create_dir_all(self.resolve(path))
                .await
                .map_err(io_err),
            StepAction::Remove { path } => remove_path(&self.resolve(path)).await.map_err(io_err),
        }
    }

    async fn run_commands(
        &self,
        step: &Step,
        commands: &[String],
        progress: ProgressSink,
        verbose: bool,
    ) -> Result<(), ExecuteError> {
        let script = commands.join(" && ");
        let dir = step
            .dir
            .as_deref()
            .map(|d| self.resolve(d))
            .unwrap_or_else(|| self.base_dir.clone());

        debug!(step = %step.name, dir = %dir.display(), script = %script, "Spawning step");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .current_dir(&dir)
            .envs(self.env.iter().chain(step.env.iter()).map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecuteError::Spawn {
                step: step.name.clone(),
                source,
            })?;

        let mut tail = VecDeque::with_capacity(STDERR_TAIL);

        if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
            let stdout =
                LinesStream::new(BufReader::new(stdout).lines()).map(|l| (Channel::Stdout, l));
            let stderr =
                LinesStream::new(BufReader::new(stderr).lines()).map(|l| (Channel::Stderr, l));
            let mut output = stdout.merge(stderr);
            let mut writer = progress.writer();

            while let Some((channel, line)) = output.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(step = %step.name, error = %e, "Failed to read step output");
                        continue;
                    }
                };
                if verbose {
                    let _ = writeln!(writer, "{}", line);
                } else if channel == Channel::Stderr {
                    if tail.len() == STDERR_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        }

        let status = child.wait().await.map_err(|source| ExecuteError::Io {
            step: step.name.clone(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(ExecuteError::Failed {
                step: step.name.clone(),
                status: status.to_string(),
                stderr: tail.into(),
            })
        }
    }
}

#[async_trait]
impl StepSequence for LocalStepSequence {
    fn len(&self) -> usize {
        self.steps.len()
    }

    async fn execute(&self, progress: ProgressSink, verbose: bool) -> Result<(), ExecuteError> {
        info!(pipeline = %self.name, steps = self.steps.len(), "Executing build steps");

        for (index, step) in self.steps.iter().enumerate() {
            info!(step = %step.name, index, action = %step.action.describe(), "Running step");
            self.run_step(step, progress, verbose).await?;
            let _ = writeln!(progress.writer(), "{}", status_line(&step.name, "OK"));
        }

        Ok(())
    }
}

/// Copy a file or a directory tree.
///
/// A file copied onto an existing directory, or onto a path ending in `/`,
/// lands inside it under its own name.
async fn copy_path(from: &Path, to: &Path) -> std::io::Result<()> {
    let metadata = tokio::fs::metadata(from).await?;
    if metadata.is_dir() {
        return copy_dir(from.to_path_buf(), to.to_path_buf()).await;
    }

    let into_dir = to.as_os_str().to_string_lossy().ends_with('/')
        || tokio::fs::metadata(to).await.is_ok_and(|m| m.is_dir());
    let target = match (into_dir, from.file_name()) {
        (true, Some(name)) => to.join(name),
        _ => to.to_path_buf(),
    };
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, &target).await?;
    Ok(())
}

#[async_recursion]
async fn copy_dir(from: PathBuf, to: PathBuf) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&to).await?;
    let mut entries = tokio::fs::read_dir(&from).await?;
    while let Some(entry) = entries.next_entry().await? {
        let target = to.join(entry.file_name());
        if entry.file_type().await?.is_dir() {
            copy_dir(entry.path(), target).await?;
        } else {
            tokio::fs::copy(entry.path(), target).await?;
        }
    }
    Ok(())
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(m) if m.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployit_config::parse_template;

    fn sequence(kdl: &str, base: &Path) -> LocalStepSequence {
        LocalStepSequence::new(parse_template(kdl).unwrap(), base)
    }

    #[tokio::test]
    async fn test_run_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let steps = sequence(
            r#"
            pipeline "p"
            step "first" { run "echo one > log.txt"; }
            step "second" { run "echo two >> log.txt"; }
            "#,
            dir.path(),
        );

        assert_eq!(steps.len(), 2);
        steps.execute(ProgressSink::Discard, false).await.unwrap();
        let log = std::fs::read_to_string(dir.path().join("log.txt")).unwrap();
        assert_eq!(log, "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_failure_stops_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let steps = sequence(
            r#"
            pipeline "p"
            step "broken" { run "echo boom >&2" "exit 3"; }
            step "never" { run "touch reached"; }
            "#,
            dir.path(),
        );

        let err = steps.execute(ProgressSink::Discard, false).await.unwrap_err();
        match err {
            ExecuteError::Failed { step, stderr, .. } => {
                assert_eq!(step, "broken");
                assert_eq!(stderr, vec!["boom".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("reached").exists());
    }

    #[tokio::test]
    async fn test_verbose_does_not_keep_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let steps = sequence(r#"pipeline "p"; step "s" { run "echo loud >&2; false"; }"#, dir.path());

        let err = steps.execute(ProgressSink::Discard, true).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Failed { ref stderr, .. } if stderr.is_empty()));
    }

    #[tokio::test]
    async fn test_env_and_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let steps = sequence(
            r#"
            pipeline "p"
            env { GREETING "hello"; }
            step "s" {
                dir "sub"
                run "echo $GREETING $TARGET > out.txt"
                env { TARGET "world"; }
            }
            "#,
            dir.path(),
        );

        steps.execute(ProgressSink::Discard, false).await.unwrap();
        let out = std::fs::read_to_string(dir.path().join("sub/out.txt")).unwrap();
        assert_eq!(out, "hello world\n");
    }

    #[tokio::test]
    async fn test_file_actions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("src/nested/b.txt"), "b").unwrap();

        let steps = sequence(
            r#"
            pipeline "p"
            step "mkdir" { mkdir "out/deep"; }
            step "tree" { copy "src" to="out/tree"; }
            step "file" { copy "src/a.txt" to="out/deep/"; }
            step "clean" { remove "out/tree/nested"; }
            step "clean-missing" { remove "does-not-exist"; }
            "#,
            dir.path(),
        );

        steps.execute(ProgressSink::Discard, false).await.unwrap();
        let out = dir.path().join("out");
        assert_eq!(std::fs::read_to_string(out.join("tree/a.txt")).unwrap(), "a");
        assert_eq!(std::fs::read_to_string(out.join("deep/a.txt")).unwrap(), "a");
        assert!(!out.join("tree/nested").exists());
    }

    #[tokio::test]
    async fn test_copy_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let steps = sequence(r#"pipeline "p"; step "cp" { copy "nope" to="there"; }"#, dir.path());

        let err = steps.execute(ProgressSink::Discard, false).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Io { ref step, .. } if step == "cp"));
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let steps = sequence(r#"pipeline "p"; step "s" { dir "missing"; run "true"; }"#, dir.path());

        let err = steps.execute(ProgressSink::Discard, false).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Spawn { .. }));
    }
}
