//! Upgrade orchestrator — drives one invocation against a service pair.
//!
//! A forward run resolves both services, plans the batches, optionally
//! pre-pulls the target image, and then walks the batch loop: scale the
//! target up, rewire links, pace, scale the source down. Progress is
//! persisted as an [`UpgradeRecord`] after every step, so a second
//! invocation can confirm, roll back, or resume an aborted run.
//!
//! Every scale call sends an absolute instance count computed from a
//! fresh read of the service. A mid-loop failure stops the loop and
//! leaves the already-applied steps in place.

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use upgrid_registry::{LinkResolver, ServiceClient};
use upgrid_state::{HostId, ServiceName, ServiceSpec, UpgradeRecord, UpgradeState};

use crate::controller::{UpgradeRun, epoch_secs, transition};
use crate::error::{UpgradeError, UpgradeResult};
use crate::gate::wait_until_healthy;
use crate::options::{FinalScale, ServicePair, UpgradeOptions};
use crate::planner::{self, BatchStep, PlanInput, UpgradePlan};
use crate::retry::with_retry;

/// Outcome of one [`Upgrader::upgrade`] invocation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UpgradeReport {
    /// State of the pair's upgrade record when the invocation ended.
    pub state: UpgradeState,
    /// Batch steps applied by this invocation.
    pub steps_applied: u32,
    pub hosts_pulled: Vec<HostId>,
    /// Hosts whose image pull failed and were left to pull on demand.
    pub hosts_skipped: Vec<HostId>,
    /// Dependents whose links were repointed.
    pub links_rewired: Vec<ServiceName>,
}

impl UpgradeReport {
    fn new(state: UpgradeState) -> Self {
        Self {
            state,
            steps_applied: 0,
            hosts_pulled: Vec::new(),
            hosts_skipped: Vec::new(),
            links_rewired: Vec::new(),
        }
    }

    fn note_rewired(&mut self, changed: Vec<ServiceName>) {
        for name in changed {
            if !self.links_rewired.contains(&name) {
                self.links_rewired.push(name);
            }
        }
    }
}

/// Rolling upgrade orchestrator over a service registry and a link resolver.
pub struct Upgrader<S, L> {
    services: S,
    links: L,
}

impl<S: ServiceClient, L: LinkResolver> Upgrader<S, L> {
    pub fn new(services: S, links: L) -> Self {
        Self { services, links }
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    /// Run one upgrade invocation for `pair`.
    ///
    /// `rollback` and `confirm_upgrade` act on an earlier run of the same
    /// pair. Without either, this starts or resumes the forward upgrade.
    pub async fn upgrade(
        &self,
        pair: &ServicePair,
        opts: &UpgradeOptions,
    ) -> UpgradeResult<UpgradeReport> {
        opts.validate()?;

        let record = with_retry(&opts.retry, &format!("load upgrade {pair}"), || {
            self.services.load_upgrade(&pair.from, &pair.to)
        })
        .await?;

        if opts.rollback {
            self.rollback(pair, opts, record).await
        } else if opts.confirm_upgrade {
            self.confirm(pair, opts, record).await
        } else {
            self.forward(pair, opts, record).await
        }
    }

    async fn forward(
        &self,
        pair: &ServicePair,
        opts: &UpgradeOptions,
        record: Option<UpgradeRecord>,
    ) -> UpgradeResult<UpgradeReport> {
        let resume = match record {
            Some(r) => match r.state {
                UpgradeState::AwaitingConfirmation
                | UpgradeState::Confirmed
                | UpgradeState::Finalized
                    if opts.cleanup =>
                {
                    return self.confirm(pair, opts, Some(r)).await;
                }
                UpgradeState::AwaitingConfirmation
                | UpgradeState::Confirmed
                | UpgradeState::Finalized => {
                    info!(%pair, state = %r.state, "upgrade already complete, nothing to do");
                    return Ok(UpgradeReport::new(r.state));
                }
                UpgradeState::Planned | UpgradeState::InProgress | UpgradeState::Aborted => {
                    info!(
                        %pair,
                        state = %r.state,
                        completed = r.completed_steps,
                        total = r.total_steps,
                        "resuming earlier upgrade"
                    );
                    Some(r)
                }
                UpgradeState::RolledBack => None,
            },
            None => None,
        };

        let source = self.get_service(opts, &pair.from).await?;
        let target = self.get_service(opts, &pair.to).await?;

        // A resumed run keeps the scale the source had before it was touched.
        let (source_scale, final_scale) = match &resume {
            Some(r) => {
                let final_scale = match opts.final_scale {
                    FinalScale::Unchanged => FinalScale::Exactly(r.final_scale),
                    requested => requested,
                };
                (r.source_scale, final_scale)
            }
            None => (source.scale, opts.final_scale),
        };

        let plan = planner::plan(&PlanInput {
            source_scale: source.scale,
            target_scale: target.scale,
            final_scale,
            batch_size: opts.batch_size,
        })?;

        let mut report = UpgradeReport::new(UpgradeState::Planned);
        if opts.pull && !plan.is_empty() {
            self.pre_pull(pair, opts, &target, &mut report).await?;
        }

        let mut run = UpgradeRun::new(pair, source_scale, plan);
        run.start()?;
        self.save(opts, run.record()).await?;

        if run.plan().is_empty() {
            info!(%pair, target_scale = target.scale, "final scale already met");
        }
        self.run_batches(pair, opts, &mut run, &mut report).await?;

        if opts.waits() {
            let expected = run.plan().final_scale;
            if let Err(e) = wait_until_healthy(
                &self.services,
                &opts.retry,
                &pair.to,
                expected,
                opts.completion_timeout,
                opts.poll_interval,
            )
            .await
            {
                self.mark_aborted(opts, &mut run).await;
                return Err(e);
            }
        }

        if opts.cleanup {
            if let Err(e) = self.finalize(opts, &pair.from).await {
                self.mark_aborted(opts, &mut run).await;
                return Err(e);
            }
            run.finish(UpgradeState::Finalized)?;
        } else {
            run.finish(UpgradeState::AwaitingConfirmation)?;
        }
        self.save(opts, run.record()).await?;

        report.state = run.state();
        Ok(report)
    }

    /// Apply every planned step in order, persisting progress after each.
    async fn run_batches(
        &self,
        pair: &ServicePair,
        opts: &UpgradeOptions,
        run: &mut UpgradeRun,
        report: &mut UpgradeReport,
    ) -> UpgradeResult<()> {
        let steps = run.plan().steps.clone();
        let total = steps.len();

        for (index, step) in steps.into_iter().enumerate() {
            let outcome = match self
                .apply_step(pair, opts, step, index + 1, total, report)
                .await
            {
                Ok(()) => {
                    run.complete_step();
                    report.steps_applied += 1;
                    self.save(opts, run.record()).await
                }
                Err(e) => Err(e),
            };

            if let Err(source) = outcome {
                let completed = run.record().completed_steps;
                error!(
                    %pair,
                    step = index + 1,
                    total,
                    error = %source,
                    "batch failed, stopping upgrade"
                );
                self.mark_aborted(opts, run).await;
                return Err(UpgradeError::Partial {
                    completed,
                    total: total as u32,
                    source: Box::new(source),
                });
            }
        }
        Ok(())
    }

    /// One batch: scale up `pair.to`, rewire, pace, scale down `pair.from`.
    async fn apply_step(
        &self,
        pair: &ServicePair,
        opts: &UpgradeOptions,
        step: BatchStep,
        index: usize,
        total: usize,
        report: &mut UpgradeReport,
    ) -> UpgradeResult<()> {
        info!(
            from = %pair.from,
            to = %pair.to,
            step = index,
            total,
            activate = step.activate,
            deactivate = step.deactivate,
            "applying batch"
        );

        let target = self.get_service(opts, &pair.to).await?;
        let scaled_to = target.scale.saturating_add(step.activate);
        self.scale(opts, &pair.to, scaled_to).await?;

        if opts.update_links {
            let changed = with_retry(
                &opts.retry,
                &format!("rewire links {} -> {}", pair.from, pair.to),
                || self.links.rewire_links(&pair.from, &pair.to),
            )
            .await?;
            if !changed.is_empty() {
                debug!(dependents = ?changed, "links rewired");
            }
            report.note_rewired(changed);
        }

        if let Some(timeout) = opts.health_gate {
            wait_until_healthy(
                &self.services,
                &opts.retry,
                &pair.to,
                scaled_to,
                timeout,
                opts.poll_interval,
            )
            .await?;
        }

        if !opts.interval.is_zero() {
            tokio::time::sleep(opts.interval).await;
        }

        if step.deactivate > 0 {
            let source = self.get_service(opts, &pair.from).await?;
            self.scale(opts, &pair.from, source.scale.saturating_sub(step.deactivate))
                .await?;
        }
        Ok(())
    }

    /// Pull the target image on every host that will run it.
    ///
    /// A host whose pull fails is logged and skipped.
    async fn pre_pull(
        &self,
        pair: &ServicePair,
        opts: &UpgradeOptions,
        target: &ServiceSpec,
        report: &mut UpgradeReport,
    ) -> UpgradeResult<()> {
        let instances = with_retry(
            &opts.retry,
            &format!("list instances of {}", pair.from),
            || self.services.list_instances(&pair.from),
        )
        .await?;

        let hosts: BTreeSet<HostId> = target
            .hosts
            .iter()
            .cloned()
            .chain(instances.into_iter().map(|i| i.host_id))
            .collect();

        info!(service = %pair.to, image = %target.image, hosts = hosts.len(), "pre-pulling image");
        for host in hosts {
            let op = format!("pull {} on {host}", pair.to);
            let pulled =
                with_retry(&opts.retry, &op, || self.services.pull_image(&pair.to, &host)).await;
            match pulled {
                Ok(()) => report.hosts_pulled.push(host),
                Err(e) => {
                    warn!(service = %pair.to, %host, error = %e, "image pull failed, skipping host");
                    report.hosts_skipped.push(host);
                }
            }
        }
        Ok(())
    }

    /// Finalize an upgrade that is awaiting confirmation.
    async fn confirm(
        &self,
        pair: &ServicePair,
        opts: &UpgradeOptions,
        record: Option<UpgradeRecord>,
    ) -> UpgradeResult<UpgradeReport> {
        let mut record = match record {
            Some(r) => r,
            None => self.adopt_record(pair, opts, None).await?,
        };

        match record.state {
            UpgradeState::Planned | UpgradeState::InProgress => {
                return Err(UpgradeError::Configuration(format!(
                    "upgrade {pair} still in progress"
                )));
            }
            UpgradeState::RolledBack | UpgradeState::Aborted => {
                return Err(UpgradeError::InvalidTransition {
                    from: record.state,
                    to: UpgradeState::Confirmed,
                });
            }
            UpgradeState::Finalized => {
                self.finalize(opts, &pair.from).await?;
                info!(%pair, "upgrade already finalized");
                return Ok(UpgradeReport::new(UpgradeState::Finalized));
            }
            UpgradeState::AwaitingConfirmation => {
                transition(&mut record, UpgradeState::Confirmed)?;
                self.save(opts, &record).await?;
            }
            UpgradeState::Confirmed => {}
        }

        self.finalize(opts, &pair.from).await?;
        transition(&mut record, UpgradeState::Finalized)?;
        self.save(opts, &record).await?;
        Ok(UpgradeReport::new(UpgradeState::Finalized))
    }

    /// Reverse a completed or interrupted upgrade: grow the source back,
    /// shrink the target.
    async fn rollback(
        &self,
        pair: &ServicePair,
        opts: &UpgradeOptions,
        record: Option<UpgradeRecord>,
    ) -> UpgradeResult<UpgradeReport> {
        let mut record = match record {
            Some(r) if r.state.can_transition_to(UpgradeState::RolledBack) => r,
            Some(r) => {
                return Err(UpgradeError::InvalidTransition {
                    from: r.state,
                    to: UpgradeState::RolledBack,
                });
            }
            None => self.adopt_record(pair, opts, Some(opts.final_scale)).await?,
        };

        let reversed = pair.reversed();
        let current = self.get_service(opts, &reversed.from).await?;
        let original = self.get_service(opts, &reversed.to).await?;
        let plan = planner::plan(&PlanInput {
            source_scale: current.scale,
            target_scale: original.scale,
            final_scale: FinalScale::Exactly(record.source_scale),
            batch_size: opts.batch_size,
        })?;

        info!(
            %pair,
            restore_scale = record.source_scale,
            batches = plan.len(),
            "rolling back upgrade"
        );

        let mut report = UpgradeReport::new(UpgradeState::AwaitingConfirmation);
        self.reverse_batches(&reversed, opts, &plan, &mut report)
            .await?;

        // Whatever the batches did not retire goes now.
        let leftover = self.get_service(opts, &reversed.from).await?;
        if leftover.scale > 0 {
            self.scale(opts, &reversed.from, 0).await?;
        }

        if opts.waits() {
            wait_until_healthy(
                &self.services,
                &opts.retry,
                &reversed.to,
                record.source_scale,
                opts.completion_timeout,
                opts.poll_interval,
            )
            .await?;
        }

        transition(&mut record, UpgradeState::RolledBack)?;
        self.save(opts, &record).await?;
        report.state = record.state;
        Ok(report)
    }

    /// Batch loop of a rollback. The record keeps its state on failure.
    async fn reverse_batches(
        &self,
        reversed: &ServicePair,
        opts: &UpgradeOptions,
        plan: &UpgradePlan,
        report: &mut UpgradeReport,
    ) -> UpgradeResult<()> {
        let total = plan.len();
        for (index, step) in plan.steps.iter().enumerate() {
            if let Err(source) = self
                .apply_step(reversed, opts, *step, index + 1, total, report)
                .await
            {
                error!(
                    from = %reversed.from,
                    to = %reversed.to,
                    step = index + 1,
                    total,
                    error = %source,
                    "rollback batch failed"
                );
                return Err(UpgradeError::Partial {
                    completed: report.steps_applied,
                    total: total as u32,
                    source: Box::new(source),
                });
            }
            report.steps_applied += 1;
        }
        Ok(())
    }

    /// Build an awaiting-confirmation record for a pair with no history.
    ///
    /// For rollback, `restore` decides the source scale to restore: an
    /// explicit scale wins, otherwise the target's current scale is used.
    async fn adopt_record(
        &self,
        pair: &ServicePair,
        opts: &UpgradeOptions,
        restore: Option<FinalScale>,
    ) -> UpgradeResult<UpgradeRecord> {
        let target = self.get_service(opts, &pair.to).await?;
        let source_scale = match restore {
            Some(scale) => scale.resolve(target.scale),
            None => match self.get_service(opts, &pair.from).await {
                Ok(source) => source.scale,
                Err(e) if is_not_found(&e) => 0,
                Err(e) => return Err(e),
            },
        };
        warn!(%pair, "no upgrade record found, treating pair as awaiting confirmation");

        let now = epoch_secs();
        Ok(UpgradeRecord {
            from: pair.from.clone(),
            to: pair.to.clone(),
            source_scale,
            final_scale: target.scale,
            completed_steps: 0,
            total_steps: 0,
            state: UpgradeState::AwaitingConfirmation,
            started_at: now,
            updated_at: now,
        })
    }

    /// Retire the source: scale it to zero, then delete it.
    ///
    /// A source that is already gone counts as retired.
    async fn finalize(&self, opts: &UpgradeOptions, source: &str) -> UpgradeResult<()> {
        info!(service = %source, "retiring source service");

        match self.scale(opts, source, 0).await {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {
                debug!(service = %source, "source already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        match with_retry(&opts.retry, &format!("delete service {source}"), || {
            self.services.delete_service(source)
        })
        .await
        {
            Ok(()) => {
                info!(service = %source, "source service deleted");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Move a failed run to `Aborted`. Saving is best effort.
    async fn mark_aborted(&self, opts: &UpgradeOptions, run: &mut UpgradeRun) {
        if let Err(e) = run.finish(UpgradeState::Aborted) {
            warn!(error = %e, "could not mark upgrade aborted");
            return;
        }
        if let Err(e) = self.save(opts, run.record()).await {
            warn!(error = %e, "could not persist aborted upgrade");
        }
    }

    async fn get_service(&self, opts: &UpgradeOptions, name: &str) -> UpgradeResult<ServiceSpec> {
        with_retry(&opts.retry, &format!("get service {name}"), || {
            self.services.get_service(name)
        })
        .await
    }

    async fn scale(&self, opts: &UpgradeOptions, name: &str, scale: u32) -> UpgradeResult<()> {
        let spec = with_retry(&opts.retry, &format!("scale {name} to {scale}"), || {
            self.services.scale_service(name, scale)
        })
        .await?;
        debug!(service = %name, scale = spec.scale, "service scaled");
        Ok(())
    }

    async fn save(&self, opts: &UpgradeOptions, record: &UpgradeRecord) -> UpgradeResult<()> {
        with_retry(
            &opts.retry,
            &format!("save upgrade {} -> {}", record.from, record.to),
            || self.services.save_upgrade(record),
        )
        .await
    }
}

fn is_not_found(e: &UpgradeError) -> bool {
    e.client_error().is_some_and(|c| c.is_not_found())
}
