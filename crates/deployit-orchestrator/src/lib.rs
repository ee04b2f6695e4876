//! Run orchestration for deployit.
//!
//! Sequences trust verification, key loading, repository synchronization,
//! template parsing and step execution, and maps the failing stage to a
//! stable process exit code.

pub mod orchestrator;
pub mod outcome;

pub use orchestrator::{Collaborators, Orchestrator};
pub use outcome::{
    EXIT_EXECUTE, EXIT_INTERNAL, EXIT_KEY_BASE, EXIT_KEY_FIRST, EXIT_PARSE, EXIT_SUCCESS,
    EXIT_SYNC_BASE, EXIT_SYNC_FIRST, EXIT_TEARDOWN, EXIT_TRUST, EXIT_USAGE, RunError, RunResult, RunStatus, Stage, StageError,
};
