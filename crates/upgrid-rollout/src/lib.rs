//! upgrid rolling upgrades — move a live service onto a replacement.
//!
//! This crate drives a rolling upgrade from a source service to a target
//! service in paced batches. The target is scaled up, dependents'
//! links are optionally rewired, and after the interval the source is
//! scaled down by the same amount. A finished upgrade waits for an
//! operator to confirm (retire the source) or roll back (reverse the
//! batches).
//!
//! # Components
//!
//! - **`options`** — Immutable upgrade configuration and the service pair
//! - **`planner`** — Batch planning (instances to activate/deactivate per step)
//! - **`controller`** — Upgrade lifecycle state machine
//! - **`retry`** — Bounded retry of transient registry failures
//! - **`gate`** — Bounded health polling of a service's instances
//! - **`upgrade`** — The orchestrator tying it all together

pub mod controller;
pub mod error;
pub mod gate;
pub mod options;
pub mod planner;
pub mod retry;
pub mod upgrade;

pub use controller::UpgradeRun;
pub use error::{UpgradeError, UpgradeResult};
pub use options::{FinalScale, RetryPolicy, ServicePair, UpgradeOptions};
pub use planner::{BatchStep, PlanInput, UpgradePlan};
pub use upgrade::{UpgradeReport, Upgrader};
