//! Domain types for the upgrid state store.
//!
//! These types represent the persisted state of services, instances,
//! hosts, and upgrade runs. All types are serializable to/from JSON for
//! storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a service (its name).
pub type ServiceName = String;

/// Unique identifier for an instance within a service.
pub type InstanceId = String;

/// Unique identifier for a host.
pub type HostId = String;

// ── Service ───────────────────────────────────────────────────────

/// A named, scalable set of instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    pub name: ServiceName,
    /// Image reference every instance runs.
    pub image: String,
    /// Number of instances the service is scaled to.
    pub scale: u32,
    /// Hosts eligible to run this service's instances.
    #[serde(default)]
    pub hosts: Vec<HostId>,
    /// Services this service points at.
    #[serde(default)]
    pub links: Vec<ServiceName>,
    /// Unix timestamp (seconds) when this spec was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this spec was last updated.
    pub updated_at: u64,
}

impl ServiceSpec {
    /// Whether this service links to `target`.
    pub fn links_to(&self, target: &str) -> bool {
        self.links.iter().any(|l| l == target)
    }
}

// ── Instance ──────────────────────────────────────────────────────

/// Runtime state of a single instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceState {
    pub id: InstanceId,
    pub service: ServiceName,
    pub host_id: HostId,
    pub health: HealthStatus,
    /// Unix timestamp when this instance started.
    pub started_at: u64,
    /// Unix timestamp of last health change.
    pub updated_at: u64,
}

/// Health state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
    Stopped,
}

// ── Host ──────────────────────────────────────────────────────────

/// A host that can run instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostInfo {
    pub id: HostId,
    pub address: String,
    /// Images already pulled onto this host.
    #[serde(default)]
    pub cached_images: Vec<String>,
    pub updated_at: u64,
}

// ── Upgrade ───────────────────────────────────────────────────────

/// Lifecycle position of one upgrade run between a service pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeState {
    Planned,
    InProgress,
    AwaitingConfirmation,
    Confirmed,
    RolledBack,
    Finalized,
    Aborted,
}

impl UpgradeState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: UpgradeState) -> bool {
        use UpgradeState::*;
        matches!(
            (self, next),
            (Planned, InProgress)
                | (InProgress, AwaitingConfirmation)
                | (InProgress, Finalized)
                | (InProgress, Aborted)
                | (InProgress, RolledBack)
                | (AwaitingConfirmation, Confirmed)
                | (AwaitingConfirmation, RolledBack)
                | (Confirmed, Finalized)
                | (Aborted, RolledBack)
        )
    }

    /// Terminal states accept no further transitions.
    ///
    /// `Aborted` is not terminal: an aborted run can still be rolled back.
    pub fn is_terminal(self) -> bool {
        matches!(self, UpgradeState::RolledBack | UpgradeState::Finalized)
    }
}

impl std::fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpgradeState::Planned => "planned",
            UpgradeState::InProgress => "in_progress",
            UpgradeState::AwaitingConfirmation => "awaiting_confirmation",
            UpgradeState::Confirmed => "confirmed",
            UpgradeState::RolledBack => "rolled_back",
            UpgradeState::Finalized => "finalized",
            UpgradeState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Persisted progress of an upgrade between two services.
///
/// Holds lifecycle position only. Scales are always re-read from the
/// registry before acting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpgradeRecord {
    pub from: ServiceName,
    pub to: ServiceName,
    /// Scale of the source service when the upgrade was first planned.
    pub source_scale: u32,
    /// Resolved final scale of the target service.
    pub final_scale: u32,
    pub completed_steps: u32,
    pub total_steps: u32,
    pub state: UpgradeState,
    pub started_at: u64,
    pub updated_at: u64,
}

// ── Keys ──────────────────────────────────────────────────────────

impl InstanceState {
    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service, self.id)
    }
}

impl UpgradeRecord {
    /// Build the composite key for the upgrades table.
    pub fn table_key(&self) -> String {
        upgrade_key(&self.from, &self.to)
    }
}

/// Key for the upgrade record of a `from` → `to` pair.
pub fn upgrade_key(from: &str, to: &str) -> String {
    format!("{from}->{to}")
}
