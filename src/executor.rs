//! Stop, pull and recreate a stale container on its new image.
//!
//! The image is pulled and confirmed present before anything destructive
//! happens, so a failed pull leaves the running container untouched.

use log::{debug, error, info, warn};

use crate::error::{RecreateError, Rollback, RuntimeError, Stage};
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerRecord, SkipReason, UpdateDecision, UpdateOutcome};

/// Process-wide switches controlling what the executor may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub auto_update: bool,
    pub dry_run: bool,
    pub rollback_on_failure: bool,
    /// Grace period, in seconds, given to the old container on stop.
    pub stop_timeout: i64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            auto_update: true,
            dry_run: false,
            rollback_on_failure: false,
            stop_timeout: 30,
        }
    }
}

pub struct Executor<'a> {
    runtime: &'a dyn ContainerRuntime,
    policy: Policy,
}

fn at_stage(container: &str, stage: Stage) -> impl FnOnce(RuntimeError) -> RecreateError + '_ {
    move |source| RecreateError::new(container, stage, source)
}

impl<'a> Executor<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, policy: Policy) -> Self {
        Self { runtime, policy }
    }

    pub async fn execute(
        &self,
        record: &ContainerRecord,
        decision: &UpdateDecision,
    ) -> UpdateOutcome {
        match decision {
            UpdateDecision::UpToDate => return UpdateOutcome::Skipped(SkipReason::UpToDate),
            UpdateDecision::Undetermined(reason) => {
                return UpdateOutcome::Skipped(SkipReason::Undetermined(reason.clone()))
            }
            UpdateDecision::Stale { .. } => {}
        }

        if self.policy.dry_run {
            info!(
                "  [DRY RUN] Would pull {} and recreate {}",
                record.image, record.name
            );
            return UpdateOutcome::Skipped(SkipReason::DryRun);
        }
        if !self.policy.auto_update {
            info!("  Update available but AUTO_UPDATE=false. Skipping restart.");
            return UpdateOutcome::Skipped(SkipReason::AutoUpdateDisabled);
        }

        match self.recreate(record).await {
            Ok(new_id) => {
                info!(
                    "  Container {} recreated (ID: {})",
                    record.name,
                    short_id(&new_id)
                );
                UpdateOutcome::Succeeded { new_id }
            }
            Err(e) => {
                error!("  {}", e);
                UpdateOutcome::Failed(e)
            }
        }
    }

    async fn recreate(&self, record: &ContainerRecord) -> Result<String, RecreateError> {
        let name = record.name.as_str();

        info!("  Pulling latest image: {}", record.image);
        self.runtime
            .pull_image(&record.image)
            .await
            .map_err(at_stage(name, Stage::Pull))?;
        let digests = self
            .runtime
            .image_digests(record.image.as_str())
            .await
            .map_err(at_stage(name, Stage::Verify))?;
        debug!("  Pulled {} ({})", record.image, digests.join(", "));

        info!("  Stopping container: {}", name);
        self.runtime
            .stop_container(&record.id, self.policy.stop_timeout)
            .await
            .map_err(at_stage(name, Stage::Stop))?;

        if let Err(source) = self.runtime.remove_container(&record.id).await {
            // Still present, only stopped: bring it back as it was.
            if let Err(e) = self.runtime.start_container(&record.id).await {
                error!("  Could not restart {} after failed removal: {}", name, e);
            }
            return Err(RecreateError::new(name, Stage::Remove, source));
        }

        info!("  Recreating container: {}", name);
        debug!(
            "  Reusing {} env vars, network mode {}",
            record.snapshot.env().len(),
            record.snapshot.network_mode().unwrap_or("default")
        );
        let new_id = match self
            .runtime
            .create_container(name, record.image.as_str(), &record.snapshot)
            .await
        {
            Ok(id) => id,
            Err(source) => return Err(self.destroyed(record, Stage::Create, source, None).await),
        };
        if let Err(source) = self.runtime.start_container(&new_id).await {
            return Err(self
                .destroyed(record, Stage::Start, source, Some(&new_id))
                .await);
        }

        Ok(new_id)
    }

    /// The old container is gone and its replacement is not running.
    async fn destroyed(
        &self,
        record: &ContainerRecord,
        stage: Stage,
        source: RuntimeError,
        half_created: Option<&str>,
    ) -> RecreateError {
        error!(
            "  Container {} was removed and its replacement failed to {}: {}. \
             Recreate it manually from image {} (previous image id {}).",
            record.name, stage, source, record.image, record.image_id
        );
        let mut err = RecreateError::new(&record.name, stage, source);
        if self.policy.rollback_on_failure {
            err.rollback = self.roll_back(record, half_created).await;
        }
        err
    }

    /// Recreate the original container from its snapshot on the image it
    /// was running before the update. The reference is re-tagged onto the
    /// old image first so the restored container keeps its original name
    /// for the image and is checked again on the next cycle.
    async fn roll_back(&self, record: &ContainerRecord, half_created: Option<&str>) -> Rollback {
        warn!(
            "  Rolling back {} to previous image {}",
            record.name, record.image_id
        );
        if let Some(id) = half_created {
            if let Err(e) = self.runtime.remove_container(id).await {
                return Rollback::Failed(format!("could not remove new container {id}: {e}"));
            }
        }
        if let Err(e) = self.runtime.tag_image(&record.image_id, &record.image).await {
            return Rollback::Failed(format!(
                "could not tag {} as {}: {e}",
                record.image_id, record.image
            ));
        }
        let id = match self
            .runtime
            .create_container(&record.name, record.image.as_str(), &record.snapshot)
            .await
        {
            Ok(id) => id,
            Err(e) => return Rollback::Failed(e.to_string()),
        };
        match self.runtime.start_container(&id).await {
            Ok(()) => {
                info!("  Rolled back {} (ID: {})", record.name, short_id(&id));
                Rollback::Restored { id }
            }
            Err(e) => Rollback::Failed(e.to_string()),
        }
    }
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
