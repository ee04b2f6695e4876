//! KDL template pipeline.

use deployit_config::variables::VariableContextBuilder;
use deployit_config::{ConfigError, parse_data, parse_template};
use deployit_core::{ParseError, StepSequence, TemplatePipeline};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::local::LocalStepSequence;

/// Parses KDL step templates and runs them with [`LocalStepSequence`].
#[derive(Debug, Clone)]
pub struct KdlTemplatePipeline {
    workspace: PathBuf,
}

impl KdlTemplatePipeline {
    /// `workspace` is exposed to templates as `${workspace}`.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }
}

fn read(path: &Path) -> Result<String, ParseError> {
    std::fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn template_error(path: &Path) -> impl Fn(ConfigError) -> ParseError + '_ {
    move |e| ParseError::Template {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

impl TemplatePipeline for KdlTemplatePipeline {
    fn parse(&self, template: &Path, data: &Path) -> Result<Box<dyn StepSequence>, ParseError> {
        let template_text = read(template)?;
        let data_text = read(data)?;

        let vars = parse_data(&data_text).map_err(|e| ParseError::Data {
            path: data.to_path_buf(),
            message: e.to_string(),
        })?;
        let raw = parse_template(&template_text).map_err(template_error(template))?;

        let absolute = |p: &Path| {
            std::path::absolute(p).map_err(|e| ParseError::Template {
                path: template.to_path_buf(),
                message: format!("cannot resolve {}: {}", p.display(), e),
            })
        };
        let template_dir = absolute(template.parent().unwrap_or(Path::new(".")))?;
        let workspace = absolute(&self.workspace)?;

        let ctx = VariableContextBuilder::new()
            .with_vars(vars)
            .with_process_env()
            .with_workspace(workspace)
            .with_template_dir(&template_dir)
            .build();
        let rendered = raw.render(&ctx).map_err(template_error(template))?;

        info!(
            template = %template.display(),
            pipeline = %rendered.name,
            steps = rendered.steps.len(),
            "Parsed step template"
        );
        Ok(Box::new(LocalStepSequence::new(rendered, template_dir)))
    }
}
