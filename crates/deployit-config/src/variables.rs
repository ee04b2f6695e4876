//! Variable interpolation for step templates.
//!
//! Supports variables like:
//! - `${name}` / `${mission.map.name}` - Values from the data file
//! - `${env.VAR_NAME}` - Environment variable
//! - `${workspace}` - Absolute path of the scratch workspace
//! - `${template_dir}` - Directory containing the template
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)
//! - `${datetime}` - ISO datetime
//!
//! Built-in names win over data file keys of the same name.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::{ConfigError, ConfigResult};

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z_][A-Za-z0-9_-]*)*)\}").unwrap()
});

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone)]
pub struct VariableContext {
    /// Flattened data file values
    pub vars: HashMap<String, String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    pub workspace: Option<PathBuf>,
    pub template_dir: Option<PathBuf>,
    /// Fixed for the whole render so every step sees the same time.
    pub now: DateTime<Utc>,
}

impl Default for VariableContext {
    fn default() -> Self {
        Self {
            vars: HashMap::new(),
            env: HashMap::new(),
            workspace: None,
            template_dir: None,
            now: Utc::now(),
        }
    }
}

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let builtin = match var_name.split_once('.') {
            Some(("env", name)) => return self.env.get(name).cloned(),
            Some(_) => None,
            None => match var_name {
                "workspace" => self.workspace.as_deref().map(path_string),
                "template_dir" => self.template_dir.as_deref().map(path_string),
                "timestamp" => Some(self.now.timestamp().to_string()),
                "date" => Some(self.now.format("%Y-%m-%d").to_string()),
                "datetime" => Some(self.now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                _ => None,
            },
        };
        builtin.or_else(|| self.vars.get(var_name).cloned())
    }

    /// Interpolate all variables in a string.
    /// Any placeholder that does not resolve is an error.
    pub fn render(&self, input: &str) -> ConfigResult<String> {
        if let Some(missing) = self.find_unresolved(input).into_iter().next() {
            return Err(ConfigError::Unresolved(missing));
        }
        Ok(VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                self.resolve(&caps[1]).unwrap_or_default()
            })
            .to_string())
    }

    /// Interpolate variables in a list of strings.
    pub fn render_vec(&self, inputs: &[String]) -> ConfigResult<Vec<String>> {
        inputs.iter().map(|s| self.render(s)).collect()
    }

    /// Interpolate the values of ordered key/value pairs.
    pub fn render_pairs(&self, pairs: &[(String, String)]) -> ConfigResult<Vec<(String, String)>> {
        pairs
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.render(v)?)))
            .collect()
    }

    /// Names of placeholders in `input` that have no value.
    pub fn find_unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .filter(|caps| self.resolve(&caps[1]).is_none())
            .map(|caps| caps[1].to_string())
            .collect()
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.ctx.vars.extend(vars);
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_process_env(mut self) -> Self {
        self.ctx.populate_env();
        self
    }

    pub fn with_workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.ctx.workspace = Some(path.into());
        self
    }

    pub fn with_template_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.ctx.template_dir = Some(path.into());
        self
    }

    pub fn with_time(mut self, now: DateTime<Utc>) -> Self {
        self.ctx.now = now;
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_basic_interpolation() {
        let ctx = VariableContextBuilder::new()
            .with_var("mission.name", "alpha")
            .with_var("version", "3")
            .build();

        let result = ctx.render("Build ${mission.name} v${version}").unwrap();
        assert_eq!(result, "Build alpha v3");
    }

    #[test]
    fn test_env_variables() {
        let ctx = VariableContextBuilder::new()
            .with_env("MY_VAR", "hello")
            .with_env("ANOTHER", "world")
            .build();

        let result = ctx.render("${env.MY_VAR} ${env.ANOTHER}!").unwrap();
        assert_eq!(result, "hello world!");
    }

    #[test]
    fn test_unknown_variable_is_error() {
        let ctx = VariableContext::new();
        let err = ctx.render("Unknown: ${unknown.var}").unwrap_err();
        assert!(matches!(err, ConfigError::Unresolved(ref name) if name == "unknown.var"));
    }

    #[test]
    fn test_missing_env_is_error() {
        let ctx = VariableContext::new();
        assert!(ctx.render("${env.DEPLOYIT_SURELY_UNSET_VAR}").is_err());
    }

    #[test]
    fn test_builtins_win_over_data() {
        let ctx = VariableContextBuilder::new()
            .with_workspace("/abs/temp")
            .with_var("workspace", "from-data")
            .build();
        assert_eq!(ctx.render("${workspace}").unwrap(), "/abs/temp");
    }

    #[test]
    fn test_unset_builtin_falls_back_to_data() {
        let ctx = VariableContextBuilder::new()
            .with_var("template_dir", "from-data")
            .build();
        assert_eq!(ctx.render("${template_dir}").unwrap(), "from-data");
    }

    #[test]
    fn test_time_variables() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let ctx = VariableContextBuilder::new().with_time(now).build();

        assert_eq!(ctx.render("${date}").unwrap(), "2024-03-09");
        assert_eq!(ctx.render("${datetime}").unwrap(), "2024-03-09T14:05:07Z");
        assert_eq!(ctx.render("${timestamp}").unwrap(), now.timestamp().to_string());
    }

    #[test]
    fn test_hyphenated_names() {
        let ctx = VariableContextBuilder::new()
            .with_var("kw-bem.out-dir", "build")
            .build();
        assert_eq!(ctx.render("${kw-bem.out-dir}/x").unwrap(), "build/x");
    }

    #[test]
    fn test_render_vec_and_pairs() {
        let ctx = VariableContextBuilder::new().with_var("branch", "develop").build();

        let results = ctx
            .render_vec(&["echo ${branch}".to_string(), "deploy ${branch}".to_string()])
            .unwrap();
        assert_eq!(results, vec!["echo develop", "deploy develop"]);

        let pairs = ctx
            .render_pairs(&[("BRANCH".to_string(), "${branch}".to_string())])
            .unwrap();
        assert_eq!(pairs, vec![("BRANCH".to_string(), "develop".to_string())]);
    }

    #[test]
    fn test_find_unresolved() {
        let ctx = VariableContextBuilder::new().with_var("known", "1").build();
        let missing = ctx.find_unresolved("${known} ${a} ${b.c}");
        assert_eq!(missing, vec!["a", "b.c"]);
    }

    #[test]
    fn test_nested_braces() {
        let ctx = VariableContextBuilder::new().with_var("sha", "abc123").build();

        // Make sure we don't mess up JSON or other nested braces
        let result = ctx.render(r#"{"sha": "${sha}"}"#).unwrap();
        assert_eq!(result, r#"{"sha": "abc123"}"#);
    }

    #[test]
    fn test_text_without_placeholders_unchanged() {
        let ctx = VariableContext::new();
        assert_eq!(ctx.render("echo $HOME ${").unwrap(), "echo $HOME ${");
    }
}
