//! Template pipeline collaborator.
//!
//! A pipeline turns a template and a data file into an ordered sequence of
//! executable steps. Parsing and execution are separate so that a template
//! error can be told apart from a step failure.

use async_trait::async_trait;
use std::path::Path;

use crate::error::{ExecuteError, ParseError};
use crate::progress::ProgressSink;

/// Parses a template against a data file.
pub trait TemplatePipeline: Send + Sync {
    fn parse(&self, template: &Path, data: &Path) -> Result<Box<dyn StepSequence>, ParseError>;
}

/// An ordered, executable list of build steps.
#[async_trait]
pub trait StepSequence: Send + Sync {
    /// Number of steps in the sequence.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute every step in order, stopping at the first failure.
    async fn execute(&self, progress: ProgressSink, verbose: bool) -> Result<(), ExecuteError>;
}
