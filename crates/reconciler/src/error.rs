//! Error types for the reconciliation core.
//!
//! Construction-time errors (`Cycle`, `DuplicateIdentity`,
//! `UnknownDependency`) abort a run before any mutation. Provider errors
//! carry a transient/permanent classification that drives retry logic.

use crate::types::{OutputBinding, ResourceId};
use thiserror::Error;

/// Errors that can occur while building graphs, planning, or applying.
#[derive(Debug, Error)]
pub enum Error {
    /// The dependency edges form a cycle
    #[error("dependency cycle: {path}")]
    Cycle {
        /// The cycle rendered as `a -> b -> a`
        path: String,
    },

    /// Two declarations share the same (kind, name) identity
    #[error("duplicate resource identity: {id}")]
    DuplicateIdentity { id: ResourceId },

    /// A declaration depends on an identity that was never declared
    #[error("{from} depends on undeclared resource {to}")]
    UnknownDependency { from: ResourceId, to: ResourceId },

    /// Transient provider failure (rate limit, timeout); retried
    #[error("transient provider error: {message}")]
    Transient { message: String },

    /// Permanent provider failure (invalid attribute, quota); not retried
    #[error("provider error: {message}")]
    Permanent { message: String },

    /// A binding's producer terminated without publishing the output
    #[error("unresolved output {binding}: producer did not complete")]
    UnresolvedOutput { binding: OutputBinding },

    /// A dependency failed, so this node was never executed
    #[error("dependency {dependency} failed")]
    DependencyFailed { dependency: ResourceId },

    /// The run was canceled before this node was dispatched
    #[error("run canceled")]
    Canceled,

    /// State store I/O error
    #[error("state store I/O: {0}")]
    Io(#[from] std::io::Error),

    /// State record could not be serialized
    #[error("state record encode: {0}")]
    Encode(#[from] toml::ser::Error),

    /// State record could not be parsed
    #[error("state record decode: {0}")]
    Decode(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for a transient provider error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Shorthand for a permanent provider error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Whether this error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;
