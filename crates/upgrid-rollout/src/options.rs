//! Upgrade options — batch size, pacing, final scale, and follow-up actions.

use std::time::Duration;

use crate::error::{UpgradeError, UpgradeResult};

/// Desired instance count of the target service once the upgrade completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum FinalScale {
    /// Keep the source service's current scale.
    #[default]
    Unchanged,
    /// Scale the target to exactly this many instances.
    Exactly(u32),
}

impl TryFrom<i64> for FinalScale {
    type Error = UpgradeError;

    /// `-1` means "unchanged"; any other negative value is rejected.
    fn try_from(value: i64) -> UpgradeResult<Self> {
        match value {
            -1 => Ok(FinalScale::Unchanged),
            v if v < 0 => Err(UpgradeError::Configuration(format!(
                "scale must be -1 or a non-negative count, got {v}"
            ))),
            v => u32::try_from(v).map(FinalScale::Exactly).map_err(|_| {
                UpgradeError::Configuration(format!("scale {v} is too large"))
            }),
        }
    }
}

impl FinalScale {
    /// Resolve against the source scale observed at plan time.
    pub fn resolve(self, source_scale: u32) -> u32 {
        match self {
            FinalScale::Unchanged => source_scale,
            FinalScale::Exactly(n) => n,
        }
    }
}

/// How registry calls are retried on transient failures.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles on each further retry.
    pub backoff: Duration,
    /// Upper bound on every retry delay, the first one included.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

/// Configuration of one upgrade invocation.
///
/// Built once from validated input and only ever read afterwards.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UpgradeOptions {
    /// Instances moved per batch.
    pub batch_size: u32,
    /// Pause between scaling the target up and the source down.
    pub interval: Duration,
    /// Target scale at the end of the upgrade.
    pub final_scale: FinalScale,
    /// Repoint dependents' links from the source to the target.
    pub update_links: bool,
    /// Block until the target's instances are healthy after the last batch.
    pub wait: bool,
    /// Retire the source service once upgraded. Implies `wait`.
    pub cleanup: bool,
    /// Pre-pull the target image on every host that will run it.
    pub pull: bool,
    /// Finalize an upgrade that is awaiting confirmation.
    pub confirm_upgrade: bool,
    /// Reverse an upgrade that is awaiting confirmation.
    pub rollback: bool,
    /// Per-batch health gate timeout. `None` paces by `interval` alone.
    pub health_gate: Option<Duration>,
    /// Bound on the post-upgrade health wait.
    pub completion_timeout: Duration,
    /// Delay between health polls.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            batch_size: 2,
            interval: Duration::from_millis(2000),
            final_scale: FinalScale::Unchanged,
            update_links: true,
            wait: false,
            cleanup: false,
            pull: false,
            confirm_upgrade: false,
            rollback: false,
            health_gate: None,
            completion_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

impl UpgradeOptions {
    /// Reject option combinations that can never succeed.
    pub fn validate(&self) -> UpgradeResult<()> {
        if self.batch_size == 0 {
            return Err(UpgradeError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.confirm_upgrade && self.rollback {
            return Err(UpgradeError::Configuration(
                "confirm-upgrade and rollback are mutually exclusive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(UpgradeError::Configuration(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the run should wait for the target to settle.
    pub fn waits(&self) -> bool {
        self.wait || self.cleanup
    }
}

/// The `from` → `to` service names of an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePair {
    pub from: String,
    pub to: String,
}

impl ServicePair {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> UpgradeResult<Self> {
        let pair = Self {
            from: from.into(),
            to: to.into(),
        };
        if pair.from.is_empty() || pair.to.is_empty() {
            return Err(UpgradeError::Configuration(
                "service names must not be empty".to_string(),
            ));
        }
        if pair.from == pair.to {
            return Err(UpgradeError::Configuration(format!(
                "cannot upgrade {} onto itself",
                pair.from
            )));
        }
        Ok(pair)
    }

    /// Build from positional arguments: exactly `[from service] [to service]`.
    pub fn from_args(args: &[String]) -> UpgradeResult<Self> {
        match args {
            [from, to] => Self::new(from.as_str(), to.as_str()),
            _ => Err(UpgradeError::Configuration(
                "pass arguments in the form: [from service] [to service]".to_string(),
            )),
        }
    }

    /// The same pair with roles swapped, as used by rollback.
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

impl std::fmt::Display for ServicePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_upgrade_command() {
        let opts = UpgradeOptions::default();
        assert_eq!(opts.batch_size, 2);
        assert_eq!(opts.interval, Duration::from_millis(2000));
        assert_eq!(opts.final_scale, FinalScale::Unchanged);
        assert!(opts.update_links);
        assert!(!opts.wait && !opts.cleanup && !opts.pull);
        assert!(opts.health_gate.is_none());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let opts = UpgradeOptions {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(UpgradeError::Configuration(_))
        ));
    }

    #[test]
    fn confirm_and_rollback_are_exclusive() {
        let opts = UpgradeOptions {
            confirm_upgrade: true,
            rollback: true,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(UpgradeError::Configuration(_))
        ));
    }

    #[test]
    fn cleanup_implies_wait() {
        let opts = UpgradeOptions {
            cleanup: true,
            ..Default::default()
        };
        assert!(opts.waits());
    }

    #[test]
    fn final_scale_from_signed() {
        assert_eq!(FinalScale::try_from(-1).unwrap(), FinalScale::Unchanged);
        assert_eq!(FinalScale::try_from(0).unwrap(), FinalScale::Exactly(0));
        assert_eq!(FinalScale::try_from(6).unwrap(), FinalScale::Exactly(6));
        assert!(FinalScale::try_from(-2).is_err());
        assert!(FinalScale::try_from(i64::MAX).is_err());
    }

    #[test]
    fn final_scale_resolution() {
        assert_eq!(FinalScale::Unchanged.resolve(4), 4);
        assert_eq!(FinalScale::Exactly(6).resolve(4), 6);
    }

    #[test]
    fn pair_requires_exactly_two_args() {
        let args = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let pair = ServicePair::from_args(&args(&["web-v1", "web-v2"])).unwrap();
        assert_eq!(pair.from, "web-v1");
        assert_eq!(pair.to, "web-v2");
        assert_eq!(pair.reversed().from, "web-v2");

        for bad in [&[][..], &["web-v1"][..], &["a", "b", "c"][..]] {
            assert!(matches!(
                ServicePair::from_args(&args(bad)),
                Err(UpgradeError::Configuration(_))
            ));
        }
    }

    #[test]
    fn pair_rejects_same_service() {
        assert!(ServicePair::new("web", "web").is_err());
        assert!(ServicePair::new("", "web").is_err());
    }
}
