//! Link rewiring — repoint inbound links from an old service to a new one.
//!
//! A link is a directed dependency `dependent → target`. Rewiring finds
//! every dependent of the old service and makes it point at the new one
//! instead. Links already pointing at the new service are left alone,
//! so rewiring twice is a no-op.

use std::future::Future;

use upgrid_state::{ServiceName, ServiceSpec};

use crate::error::ClientResult;

/// Rewires service links on the registry.
pub trait LinkResolver: Send + Sync {
    /// Repoint every link to `old` so it targets `new` instead.
    ///
    /// Returns the names of the services whose links changed.
    fn rewire_links(
        &self,
        old: &str,
        new: &str,
    ) -> impl Future<Output = ClientResult<Vec<ServiceName>>> + Send;
}

/// Repoint `spec`'s link to `old` at `new`. Returns true if `spec` changed.
///
/// The old and new services themselves are never rewritten, and a
/// dependent that already links to `new` just drops its `old` link.
pub fn repoint_links(spec: &mut ServiceSpec, old: &str, new: &str) -> bool {
    if spec.name == old || spec.name == new || !spec.links_to(old) {
        return false;
    }

    let already_linked = spec.links_to(new);
    spec.links.retain(|l| l != old);
    if !already_linked {
        spec.links.push(new.to_string());
    }
    spec.links.sort();
    true
}
