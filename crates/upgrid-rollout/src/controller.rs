//! Upgrade controller — the lifecycle state machine of one upgrade run.
//!
//! ```text
//! Planned → InProgress → AwaitingConfirmation → Confirmed → Finalized
//!              │ │ │               └──────────→ RolledBack
//!              │ │ └→ Finalized                     ↑
//!              │ └→ Aborted ────────────────────────┤
//!              └────────────────────────────────────┘
//! ```
//!
//! `Finalized` and `RolledBack` are terminal. An `Aborted` run can be
//! rolled back or replaced by a fresh run.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::info;

use upgrid_state::{UpgradeRecord, UpgradeState};

use crate::error::{UpgradeError, UpgradeResult};
use crate::options::ServicePair;
use crate::planner::UpgradePlan;

/// Move `record` to `next`, rejecting illegal transitions.
pub fn transition(record: &mut UpgradeRecord, next: UpgradeState) -> UpgradeResult<()> {
    if !record.state.can_transition_to(next) {
        return Err(UpgradeError::InvalidTransition {
            from: record.state,
            to: next,
        });
    }
    info!(
        from = %record.from,
        to = %record.to,
        state = %next,
        previous = %record.state,
        "upgrade state changed"
    );
    record.state = next;
    record.updated_at = epoch_secs();
    Ok(())
}

/// A forward upgrade in progress.
#[derive(Debug, Clone)]
pub struct UpgradeRun {
    record: UpgradeRecord,
    plan: UpgradePlan,
    started_at: Option<Instant>,
}

impl UpgradeRun {
    /// Plan a new run. `source_scale` is the source's original scale.
    pub fn new(pair: &ServicePair, source_scale: u32, plan: UpgradePlan) -> Self {
        let now = epoch_secs();
        let record = UpgradeRecord {
            from: pair.from.clone(),
            to: pair.to.clone(),
            source_scale,
            final_scale: plan.final_scale,
            completed_steps: 0,
            total_steps: plan.len() as u32,
            state: UpgradeState::Planned,
            started_at: now,
            updated_at: now,
        };
        Self {
            record,
            plan,
            started_at: None,
        }
    }

    pub fn record(&self) -> &UpgradeRecord {
        &self.record
    }

    pub fn plan(&self) -> &UpgradePlan {
        &self.plan
    }

    pub fn state(&self) -> UpgradeState {
        self.record.state
    }

    /// `Planned` → `InProgress`.
    pub fn start(&mut self) -> UpgradeResult<()> {
        transition(&mut self.record, UpgradeState::InProgress)?;
        self.started_at = Some(Instant::now());
        info!(
            from = %self.record.from,
            to = %self.record.to,
            batches = self.record.total_steps,
            final_scale = self.record.final_scale,
            "started rolling upgrade"
        );
        Ok(())
    }

    /// Record one more batch as fully applied.
    pub fn complete_step(&mut self) {
        self.record.completed_steps += 1;
        self.record.updated_at = epoch_secs();
    }

    /// Move to `next` once the batch loop is over.
    pub fn finish(&mut self, next: UpgradeState) -> UpgradeResult<()> {
        transition(&mut self.record, next)?;
        if let Some(started) = self.started_at {
            info!(
                from = %self.record.from,
                to = %self.record.to,
                elapsed_ms = started.elapsed().as_millis() as u64,
                state = %next,
                "rolling upgrade finished"
            );
        }
        Ok(())
    }

    /// Hand the record over, e.g. to continue with finalize.
    pub fn into_record(self) -> UpgradeRecord {
        self.record
    }
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
