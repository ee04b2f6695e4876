//! Step execution for deployit.
//!
//! Provides the default template pipeline:
//! - KDL templates rendered against a KDL data file
//! - Local execution of the resulting steps

pub mod local;
pub mod pipeline;

pub use local::LocalStepSequence;
pub use pipeline::KdlTemplatePipeline;
