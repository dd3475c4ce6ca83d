//! upgrid-registry — the service registry the upgrade engine drives.
//!
//! Defines the two collaborator contracts the orchestrator consumes:
//!
//! - **`ServiceClient`** — inspect, scale, and delete services, list their
//!   instances, query instance health, pull images onto hosts, and
//!   persist upgrade records
//! - **`LinkResolver`** — repoint inbound links from an old service to a
//!   new one
//!
//! Every failure is a [`ClientError`] that knows whether it is transient
//! (worth retrying) or terminal.
//!
//! [`LocalRegistry`] implements both contracts on top of a
//! [`upgrid_state::StateStore`], which is what the CLI and the
//! integration tests run against.

pub mod client;
pub mod error;
pub mod links;
pub mod local;

pub use client::ServiceClient;
pub use error::{ClientError, ClientResult};
pub use links::{LinkResolver, repoint_links};
pub use local::LocalRegistry;
