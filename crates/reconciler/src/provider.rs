//! Provider seam - the external collaborator that talks to the cloud.
//!
//! The engine never issues API calls itself; it drives an implementation
//! of [`Provider`]. Implementations classify their failures through
//! [`Error::Transient`](crate::Error::Transient) (retried with backoff)
//! and [`Error::Permanent`](crate::Error::Permanent) (immediate node
//! failure).

use crate::error::Result;
use crate::types::Attrs;

/// Result of a successful create or update.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Provider-assigned identifier
    pub provider_id: String,
    /// Computed outputs (assigned ids, endpoints, addresses)
    pub outputs: Attrs,
}

/// Provider operation interface.
pub trait Provider: Send + Sync {
    /// Create a resource of `kind` with fully resolved attributes.
    fn create(&self, kind: &str, attrs: &Attrs) -> Result<Applied>;

    /// Update an existing resource in place.
    fn update(&self, kind: &str, provider_id: &str, attrs: &Attrs) -> Result<Applied>;

    /// Delete an existing resource.
    fn delete(&self, kind: &str, provider_id: &str) -> Result<()>;

    /// Read the live resource, `None` if it no longer exists.
    fn read(&self, kind: &str, provider_id: &str) -> Result<Option<Applied>>;
}
