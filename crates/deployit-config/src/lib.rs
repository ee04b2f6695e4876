//! KDL configuration parsing for deployit.
//!
//! This crate handles parsing of:
//! - Run definitions (deployit.kdl)
//! - Step templates and their data files
//! - Variable interpolation

pub mod data;
pub mod error;
mod nodes;
pub mod run;
pub mod template;
pub mod variables;

pub use data::parse_data;
pub use error::{ConfigError, ConfigResult};
pub use run::{MAX_REPOSITORIES, RepositorySpec, RunConfig, parse_run_config};
pub use template::{Step, StepAction, StepTemplate, parse_template};
pub use variables::{VariableContext, VariableContextBuilder};
