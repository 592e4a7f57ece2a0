//! Errors raised while building or running a resource graph.
//!
//! Failures inside a resource's `apply` are not errors of the run itself;
//! they are recorded per resource and summarized by [`Error::Failed`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A resource rejected its own declaration
    #[error("invalid {resource}: {message}")]
    Invalid { resource: String, message: String },

    /// Two resources on one host provide the same key
    #[error("duplicate provider for {key}: {first} and {second}")]
    DuplicateProvider {
        key: String,
        first: String,
        second: String,
    },

    /// Resources wait on each other in a loop
    #[error("dependency cycle: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    /// A resource that is kept depends on something being torn down
    #[error("{resource} depends on {key}, which is being deleted by {deleter}")]
    DependsOnDeletion {
        resource: String,
        key: String,
        deleter: String,
    },

    /// Two hosts share a key, so their resources would collide
    #[error("duplicate host key: {0}")]
    DuplicateHost(String),

    #[error("hosts have already been configured for this run")]
    HostsAlreadyConfigured,

    #[error("no hosts configured for this run")]
    HostsNotConfigured,

    /// Aggregate run failure
    #[error("{failed} resource(s) failed, {skipped} skipped")]
    Failed { failed: usize, skipped: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
