use log::{debug, info, warn};

use crate::error::RuntimeError;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerRecord, ScopeFilter};

/// Running containers in scope, in the order the runtime lists them.
///
/// Failing to list is fatal for the cycle. A container that cannot be
/// inspected, including one that disappeared after listing, is skipped.
pub async fn collect(
    runtime: &dyn ContainerRuntime,
    filter: Option<&ScopeFilter>,
) -> Result<Vec<ContainerRecord>, RuntimeError> {
    let summaries = runtime.list_running(filter).await?;

    let mut records = Vec::with_capacity(summaries.len());
    for summary in summaries {
        if let Some(filter) = filter {
            if !filter.matches(&summary.labels) {
                debug!("Ignoring {}: no label {}", summary.name, filter);
                continue;
            }
        }
        match runtime.inspect_container(&summary.id).await {
            Ok(record) => records.push(record),
            Err(e) if e.is_not_found() => {
                warn!("Container {} vanished before inspection", summary.name)
            }
            Err(e) => warn!("Skipping container {}: {}", summary.name, e),
        }
    }

    match filter {
        Some(filter) => info!(
            "Checking containers with label '{}': {} found",
            filter,
            records.len()
        ),
        None => info!("Checking all running containers: {} found", records.len()),
    }
    Ok(records)
}
