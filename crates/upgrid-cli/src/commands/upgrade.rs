use std::time::Duration;

use clap::Args;

use upgrid_registry::LocalRegistry;
use upgrid_rollout::{FinalScale, ServicePair, UpgradeOptions, UpgradeReport, Upgrader};
use upgrid_state::UpgradeState;

use crate::config::UpgridConfig;

#[derive(Debug, Args)]
pub struct UpgradeArgs {
    /// Service to upgrade from, then the service to upgrade to
    #[arg(value_name = "SERVICE")]
    pub services: Vec<String>,

    /// Instances moved per batch
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Final scale of the new service (-1 keeps the old service's scale)
    #[arg(long, allow_negative_numbers = true)]
    pub scale: Option<i64>,

    /// Milliseconds between scaling the new service up and the old one down
    #[arg(long)]
    pub interval: Option<u64>,

    /// Repoint links from the old service to the new one
    #[arg(long)]
    pub update_links: Option<bool>,

    /// Wait until the new service's instances are healthy
    #[arg(long)]
    pub wait: bool,

    /// Pre-pull the new image on every host that will run it
    #[arg(long)]
    pub pull: bool,

    /// Retire the old service once the upgrade finishes (implies --wait)
    #[arg(long)]
    pub cleanup: bool,

    /// Finalize an upgrade that is awaiting confirmation
    #[arg(long)]
    pub confirm_upgrade: bool,

    /// Move instances back to the old service
    #[arg(long)]
    pub rollback: bool,

    /// Seconds each batch may wait for new instances to become healthy
    #[arg(long)]
    pub health_timeout: Option<u64>,
}

impl UpgradeArgs {
    /// Apply command-line flags on top of `base`.
    pub fn options(&self, base: UpgradeOptions) -> anyhow::Result<UpgradeOptions> {
        let mut opts = base;
        if let Some(n) = self.batch_size {
            opts.batch_size = n;
        }
        if let Some(scale) = self.scale {
            opts.final_scale = FinalScale::try_from(scale)?;
        }
        if let Some(ms) = self.interval {
            opts.interval = Duration::from_millis(ms);
        }
        if let Some(update) = self.update_links {
            opts.update_links = update;
        }
        if let Some(secs) = self.health_timeout {
            opts.health_gate = Some(Duration::from_secs(secs));
        }
        opts.wait |= self.wait;
        opts.pull |= self.pull;
        opts.cleanup |= self.cleanup;
        opts.confirm_upgrade |= self.confirm_upgrade;
        opts.rollback |= self.rollback;
        opts.validate()?;
        Ok(opts)
    }
}

pub async fn run(
    registry: LocalRegistry,
    config: &UpgridConfig,
    args: UpgradeArgs,
) -> anyhow::Result<()> {
    let pair = ServicePair::from_args(&args.services)?;
    let opts = args.options(config.upgrade_options())?;

    let upgrader = Upgrader::new(registry.clone(), registry);
    let report = upgrader.upgrade(&pair, &opts).await?;
    print_report(&pair, &report);
    Ok(())
}

fn print_report(pair: &ServicePair, report: &UpgradeReport) {
    println!(
        "✓ {pair}: {} ({} batches applied)",
        report.state, report.steps_applied
    );
    if !report.hosts_pulled.is_empty() {
        println!("  Pulled on: {}", report.hosts_pulled.join(", "));
    }
    if !report.hosts_skipped.is_empty() {
        println!("  Pull skipped: {}", report.hosts_skipped.join(", "));
    }
    if !report.links_rewired.is_empty() {
        println!("  Links rewired: {}", report.links_rewired.join(", "));
    }
    if report.state == UpgradeState::AwaitingConfirmation {
        println!(
            "  Run `upgrid upgrade {} {} --confirm-upgrade` to retire {}, or --rollback to revert",
            pair.from, pair.to, pair.from
        );
    }
}

#[cfg(test)]
mod tests {
    use upgrid_rollout::UpgradeError;

    use super::*;

    fn args(services: &[&str]) -> UpgradeArgs {
        UpgradeArgs {
            services: services.iter().map(|s| s.to_string()).collect(),
            batch_size: None,
            scale: None,
            interval: None,
            update_links: None,
            wait: false,
            pull: false,
            cleanup: false,
            confirm_upgrade: false,
            rollback: false,
            health_timeout: None,
        }
    }

    #[test]
    fn flags_override_base_options() {
        let base = UpgradeOptions {
            batch_size: 5,
            update_links: false,
            ..Default::default()
        };
        let mut a = args(&["web-v1", "web-v2"]);
        a.batch_size = Some(3);
        a.scale = Some(6);
        a.interval = Some(100);
        a.cleanup = true;

        let opts = a.options(base).unwrap();
        assert_eq!(opts.batch_size, 3);
        assert_eq!(opts.final_scale, FinalScale::Exactly(6));
        assert_eq!(opts.interval, Duration::from_millis(100));
        assert!(!opts.update_links);
        assert!(opts.cleanup && opts.waits());
    }

    #[test]
    fn unset_flags_keep_base() {
        let base = UpgradeOptions {
            batch_size: 4,
            ..Default::default()
        };
        let opts = args(&[]).options(base).unwrap();
        assert_eq!(opts.batch_size, 4);
        assert_eq!(opts.final_scale, FinalScale::Unchanged);
    }

    #[test]
    fn invalid_flags_are_configuration_errors() {
        let mut a = args(&["web-v1", "web-v2"]);
        a.scale = Some(-3);
        let err = a.options(UpgradeOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::Configuration(_))
        ));

        let mut a = args(&["web-v1", "web-v2"]);
        a.confirm_upgrade = true;
        a.rollback = true;
        assert!(a.options(UpgradeOptions::default()).is_err());
    }

    #[tokio::test]
    async fn wrong_argument_count_is_a_configuration_error() {
        let registry =
            LocalRegistry::new(upgrid_state::StateStore::open_in_memory().unwrap());
        let err = run(registry, &UpgridConfig::default(), args(&["web-v1"]))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: pass arguments in the form: [from service] [to service]"
        );
    }
}
