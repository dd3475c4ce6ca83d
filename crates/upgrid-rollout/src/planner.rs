//! Batch planner — how many instances move in each step.
//!
//! Each step activates up to `batch_size` target instances and retires
//! the same number of source instances, or fewer once the source runs
//! out. Steps continue until the target reaches the final scale. Source
//! instances left over after the last step are retired at finalize.

use tracing::{debug, warn};

use crate::error::{UpgradeError, UpgradeResult};
use crate::options::FinalScale;

/// Scales observed at plan time plus the requested shape of the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanInput {
    pub source_scale: u32,
    pub target_scale: u32,
    pub final_scale: FinalScale,
    pub batch_size: u32,
}

/// One batch: instances to activate on the target and deactivate on the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStep {
    pub activate: u32,
    pub deactivate: u32,
}

/// Ordered batches taking the target from its current to its final scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePlan {
    /// Resolved final scale of the target.
    pub final_scale: u32,
    pub steps: Vec<BatchStep>,
}

impl UpgradePlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn total_activated(&self) -> u32 {
        self.steps.iter().map(|s| s.activate).sum()
    }

    pub fn total_deactivated(&self) -> u32 {
        self.steps.iter().map(|s| s.deactivate).sum()
    }
}

/// Compute the batch plan.
///
/// An already-met final scale yields an empty plan.
pub fn plan(input: &PlanInput) -> UpgradeResult<UpgradePlan> {
    if input.batch_size == 0 {
        return Err(UpgradeError::Configuration(
            "batch size must be at least 1".to_string(),
        ));
    }

    let final_scale = input.final_scale.resolve(input.source_scale);
    if input.target_scale > final_scale {
        warn!(
            target_scale = input.target_scale,
            final_scale, "target already above final scale, nothing to upgrade"
        );
    }

    let mut to_activate = final_scale.saturating_sub(input.target_scale);
    let mut source_left = input.source_scale;
    let mut steps = Vec::with_capacity(batch_count(to_activate, input.batch_size) as usize);

    while to_activate > 0 {
        let activate = input.batch_size.min(to_activate);
        let deactivate = activate.min(source_left);
        steps.push(BatchStep {
            activate,
            deactivate,
        });
        to_activate -= activate;
        source_left -= deactivate;
    }

    debug!(
        source_scale = input.source_scale,
        target_scale = input.target_scale,
        final_scale,
        batches = steps.len(),
        "upgrade planned"
    );

    Ok(UpgradePlan { final_scale, steps })
}

/// Number of batches needed to move `total` instances.
fn batch_count(total: u32, batch_size: u32) -> u32 {
    if batch_size == 0 {
        return 1;
    }
    total.div_ceil(batch_size)
}
