//! Core domain types and traits for deployit.
//!
//! This crate contains:
//! - Run identifiers
//! - The error taxonomy shared by every stage of a run
//! - Deploy keys and the credential loader
//! - The known-hosts trust verifier
//! - Workspace teardown and its scoped guard
//! - Collaborator traits (repository synchronizer, template pipeline)

pub mod credentials;
pub mod error;
pub mod id;
pub mod pipeline;
pub mod progress;
pub mod sync;
pub mod trust;
pub mod workspace;

pub use credentials::{CredentialLoader, DeployKey, EmbeddedKey, EmbeddedKeys};
pub use error::{CredentialError, ExecuteError, ParseError, SyncError, TeardownError, TrustError};
pub use id::RunId;
pub use pipeline::{StepSequence, TemplatePipeline};
pub use progress::{ProgressSink, format_elapsed, status_line};
pub use sync::{RepositorySynchronizer, SyncOutcome};
pub use trust::{KnownHosts, TrustVerifier};
pub use workspace::{FsWorkspace, WorkspaceGuard, WorkspaceManager};
