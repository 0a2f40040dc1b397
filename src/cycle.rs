//! Drives update cycles: inventory, then detect, execute and notify for
//! each container in turn.

use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;

use crate::config::RunMode;
use crate::detector;
use crate::error::RuntimeError;
use crate::executor::{Executor, Policy};
use crate::inventory;
use crate::notifier::{Notification, Notifier};
use crate::runtime::{ContainerRuntime, Registry};
use crate::types::{ContainerRecord, ScopeFilter, SkipReason, UpdateDecision, UpdateOutcome};

/// Names of the containers handled in one cycle, by result.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    /// Subset of `skipped` whose digests could not be resolved.
    pub undetermined: Vec<String>,
}

impl CycleReport {
    fn record(&mut self, name: &str, outcome: &UpdateOutcome) {
        let name = name.to_string();
        match outcome {
            UpdateOutcome::Succeeded { .. } => self.updated.push(name),
            UpdateOutcome::Failed(_) => self.failed.push(name),
            UpdateOutcome::Skipped(SkipReason::Undetermined(_)) => {
                self.undetermined.push(name.clone());
                self.skipped.push(name);
            }
            UpdateOutcome::Skipped(_) => self.skipped.push(name),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Summary - Updated: {} | Skipped: {} | Failed: {}",
            self.updated.len(),
            self.skipped.len(),
            self.failed.len()
        )
    }
}

pub struct CycleDriver {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<dyn Registry>,
    notifier: Notifier,
    filter: Option<ScopeFilter>,
    policy: Policy,
    shutdown: watch::Receiver<bool>,
    /// Held for the duration of a cycle so cycles never overlap.
    in_progress: Mutex<()>,
}

impl CycleDriver {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn Registry>,
        notifier: Notifier,
        filter: Option<ScopeFilter>,
        policy: Policy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            runtime,
            registry,
            notifier,
            filter,
            policy,
            shutdown,
            in_progress: Mutex::new(()),
        }
    }

    /// Run according to `mode`. Returns `true` if anything failed; only
    /// meaningful for single-shot runs.
    pub async fn run(&mut self, mode: RunMode) -> bool {
        let interval = match mode {
            RunMode::SingleShot => {
                return match self.run_cycle().await {
                    Ok(report) => report.has_failures(),
                    Err(e) => {
                        error!("Update cycle aborted: {}", e);
                        self.notifier.send(&Notification::cycle_aborted(&e)).await;
                        true
                    }
                };
            }
            RunMode::Scheduled(interval) => interval,
        };

        info!(
            "Scheduled to run every {} minutes. Press Ctrl+C to stop.",
            interval.as_secs() / 60
        );
        // First tick fires immediately. An overrunning cycle delays the
        // next one instead of stacking ticks.
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.changed() => {
                    info!("Shutting down.");
                    return false;
                }
            }
            if let Err(e) = self.run_cycle().await {
                error!(
                    "Update cycle aborted: {}. Retrying in {} minutes.",
                    e,
                    interval.as_secs() / 60
                );
                self.notifier.send(&Notification::cycle_aborted(&e)).await;
            }
            if self.shutting_down() {
                info!("Shutting down.");
                return false;
            }
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One pass over every container in scope. Errors only when the
    /// runtime cannot be reached for the inventory.
    pub async fn run_cycle(&self) -> Result<CycleReport, RuntimeError> {
        let _cycle = self.in_progress.lock().await;

        info!("{}", "=".repeat(60));
        info!("Starting update check");
        info!(
            "Mode: {} | Auto-update: {}",
            if self.policy.dry_run { "DRY RUN" } else { "LIVE" },
            self.policy.auto_update
        );
        info!("{}", "=".repeat(60));

        let containers = inventory::collect(self.runtime.as_ref(), self.filter.as_ref()).await?;
        let mut report = CycleReport::default();
        if containers.is_empty() {
            info!("No containers to check.");
            return Ok(report);
        }

        for record in &containers {
            if self.shutting_down() {
                warn!("Shutdown requested, leaving remaining containers for the next run");
                break;
            }
            let outcome = self.process(record).await;
            report.record(&record.name, &outcome);
        }

        info!("{}", "=".repeat(60));
        info!("{}", report.summary_line());
        if !report.updated.is_empty() {
            info!("  Updated: {}", report.updated.join(", "));
        }
        if !report.failed.is_empty() {
            info!("  Failed:  {}", report.failed.join(", "));
        }
        if !report.undetermined.is_empty() {
            info!("  Unchecked: {}", report.undetermined.join(", "));
        }
        info!("{}", "=".repeat(60));

        if let Some(summary) = Notification::summary(&report) {
            self.notifier.send(&summary).await;
        }
        Ok(report)
    }

    async fn process(&self, record: &ContainerRecord) -> UpdateOutcome {
        info!("Checking: {} ({})", record.name, record.image);
        let decision =
            detector::detect(self.runtime.as_ref(), self.registry.as_ref(), record).await;
        match &decision {
            UpdateDecision::UpToDate => info!("  Already up to date."),
            UpdateDecision::Stale { .. } => info!("  Update available!"),
            UpdateDecision::Undetermined(_) => {
                warn!("  Could not determine whether {} is stale, skipping", record.name)
            }
        }

        let outcome = Executor::new(self.runtime.as_ref(), self.policy)
            .execute(record, &decision)
            .await;
        if let Some(notification) = Notification::for_outcome(record, &outcome) {
            self.notifier.send(&notification).await;
        }
        outcome
    }
}
