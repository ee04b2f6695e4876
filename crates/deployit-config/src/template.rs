//! Step template parsing.
//!
//! ```kdl
//! pipeline "kw-bem-make"
//!
//! env {
//!     MISSION "${mission.name}"
//! }
//!
//! step "prepare" {
//!     mkdir "${workspace}/out"
//! }
//!
//! step "build" {
//!     dir "${workspace}/kw-bem-basic-scripts"
//!     run "./make.sh ${mission.name}"
//!     run "ls -la"
//! }
//!
//! step "publish" {
//!     copy "${workspace}/out/mission.pbo" to="${template_dir}/dist/"
//! }
//! ```
//!
//! Every step carries exactly one action. Placeholders stay verbatim until
//! [`StepTemplate::render`] resolves them.

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::nodes::{get_all_string_args, get_env_block, get_first_string_arg, get_string_prop, require_string_arg};
use crate::variables::VariableContext;
use crate::{ConfigError, ConfigResult};

/// A parsed step template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub name: String,
    /// Environment shared by every step.
    pub env: Vec<(String, String)>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub action: StepAction,
    /// Working directory; `None` means the template's directory.
    pub dir: Option<PathBuf>,
    /// Step-specific environment, applied over the template environment.
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepAction {
    /// Shell commands joined with `&&`.
    Run { commands: Vec<String> },
    /// Copy a file or directory tree.
    Copy { from: PathBuf, to: PathBuf },
    /// Create a directory and its parents.
    Mkdir { path: PathBuf },
    /// Remove a file or directory tree.
    Remove { path: PathBuf },
}

impl StepAction {
    /// Short description for status lines and logs.
    pub fn describe(&self) -> String {
        match self {
            StepAction::Run { commands } => commands.join(" && "),
            StepAction::Copy { from, to } => format!("copy {} -> {}", from.display(), to.display()),
            StepAction::Mkdir { path } => format!("mkdir {}", path.display()),
            StepAction::Remove { path } => format!("remove {}", path.display()),
        }
    }
}

/// Parse a step template from KDL text.
pub fn parse_template(kdl: &str) -> ConfigResult<StepTemplate> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut env = Vec::new();
    let mut steps = Vec::new();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "pipeline" => {
                name = require_string_arg(node, "pipeline name")?;
            }
            "env" => {
                env.extend(get_env_block(node));
            }
            "step" => {
                let step = parse_step(node)?;
                if !seen.insert(step.name.clone()) {
                    return Err(ConfigError::Duplicate(format!("step '{}'", step.name)));
                }
                steps.push(step);
            }
            other => return Err(ConfigError::UnknownNode(other.to_string())),
        }
    }

    if name.is_empty() {
        return Err(ConfigError::MissingField("pipeline name".to_string()));
    }
    if steps.is_empty() {
        return Err(ConfigError::MissingField("step".to_string()));
    }

    Ok(StepTemplate { name, env, steps })
}

fn parse_step(node: &KdlNode) -> ConfigResult<Step> {
    let name = require_string_arg(node, "step name")?;

    let mut commands = Vec::new();
    let mut other_actions = Vec::new();
    let mut dir = None;
    let mut env = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "run" => {
                    let args = get_all_string_args(child);
                    if args.is_empty() {
                        return Err(missing_arg(&name, "run"));
                    }
                    commands.extend(args);
                }
                "copy" => {
                    let from = get_first_string_arg(child).ok_or_else(|| missing_arg(&name, "copy"))?;
                    let to = get_string_prop(child, "to").ok_or_else(|| {
                        ConfigError::MissingField(format!("to= for copy in step '{}'", name))
                    })?;
                    other_actions.push(StepAction::Copy {
                        from: from.into(),
                        to: to.into(),
                    });
                }
                "mkdir" => {
                    let path = get_first_string_arg(child).ok_or_else(|| missing_arg(&name, "mkdir"))?;
                    other_actions.push(StepAction::Mkdir { path: path.into() });
                }
                "remove" => {
                    let path = get_first_string_arg(child).ok_or_else(|| missing_arg(&name, "remove"))?;
                    other_actions.push(StepAction::Remove { path: path.into() });
                }
                "dir" => {
                    dir = Some(PathBuf::from(get_first_string_arg(child).ok_or_else(|| missing_arg(&name, "dir"))?));
                }
                "env" => {
                    env.extend(get_env_block(child));
                }
                other => {
                    return Err(ConfigError::UnknownNode(format!("step.{}", other)));
                }
            }
        }
    }

    let kinds = other_actions.len() + usize::from(!commands.is_empty());
    let action = match kinds {
        0 => return Err(ConfigError::MissingField(format!("action for step '{}'", name))),
        1 if !commands.is_empty() => StepAction::Run { commands },
        1 => other_actions.remove(0),
        _ => {
            return Err(ConfigError::InvalidValue {
                field: format!("step '{}'", name),
                message: "a step takes exactly one action".to_string(),
            });
        }
    };

    Ok(Step { name, action, dir, env })
}

fn missing_arg(step: &str, node: &str) -> ConfigError {
    ConfigError::MissingField(format!("argument of {} in step '{}'", node, step))
}

impl StepTemplate {
    /// Resolve every placeholder in the template against `ctx`.
    pub fn render(&self, ctx: &VariableContext) -> ConfigResult<StepTemplate> {
        let steps = self
            .steps
            .iter()
            .map(|step| step.render(ctx))
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(StepTemplate {
            name: ctx.render(&self.name)?,
            env: ctx.render_pairs(&self.env)?,
            steps,
        })
    }
}

impl Step {
    fn render(&self, ctx: &VariableContext) -> ConfigResult<Step> {
        let path = |p: &PathBuf| -> ConfigResult<PathBuf> {
            Ok(PathBuf::from(ctx.render(&p.to_string_lossy())?))
        };

        let action = match &self.action {
            StepAction::Run { commands } => StepAction::Run {
                commands: ctx.render_vec(commands)?,
            },
            StepAction::Copy { from, to } => StepAction::Copy {
                from: path(from)?,
                to: path(to)?,
            },
            StepAction::Mkdir { path: p } => StepAction::Mkdir { path: path(p)? },
            StepAction::Remove { path: p } => StepAction::Remove { path: path(p)? },
        };

        Ok(Step {
            name: ctx.render(&self.name)?,
            action,
            dir: self.dir.as_ref().map(path).transpose()?,
            env: ctx.render_pairs(&self.env)?,
        })
    }
}
