//! Git repository synchronization for deployit.

pub mod sync;

pub use sync::{GitError, GitSynchronizer, set_transport_timeout};
