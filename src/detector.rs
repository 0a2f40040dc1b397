//! Staleness detection by digest comparison.
//!
//! The remote side is a manifest lookup against the registry; no layers
//! are downloaded. The local side is read from the `RepoDigests` of the
//! image the container is bound to. Tags are never compared: `latest`
//! keeps its name while the manifest behind it changes.

use log::{debug, warn};

use crate::error::DigestError;
use crate::runtime::{ContainerRuntime, Registry};
use crate::types::{familiar_name, ContainerRecord, ImageDigest, ImageReference, UpdateDecision};

pub async fn detect(
    runtime: &dyn ContainerRuntime,
    registry: &dyn Registry,
    record: &ContainerRecord,
) -> UpdateDecision {
    if let Some(pinned) = record.image.pinned_digest() {
        debug!("  {} is pinned to {}, nothing newer to resolve", record.image, pinned);
        return UpdateDecision::UpToDate;
    }

    let remote = match remote_digest(registry, &record.image).await {
        Ok(digest) => digest,
        Err(e) => {
            warn!("  {}", e);
            return UpdateDecision::Undetermined(e.to_string());
        }
    };
    let local = match local_digest(runtime, record).await {
        Ok(digest) => digest,
        Err(e) => {
            warn!("  {}", e);
            return UpdateDecision::Undetermined(e.to_string());
        }
    };

    debug!("  Local digest:  {}", local);
    debug!("  Remote digest: {}", remote);
    UpdateDecision::compare(&local, &remote)
}

pub async fn remote_digest(
    registry: &dyn Registry,
    reference: &ImageReference,
) -> Result<ImageDigest, DigestError> {
    registry
        .remote_digest(reference)
        .await
        .map_err(|source| DigestError::Remote {
            image: reference.to_string(),
            source,
        })
}

/// Digest of the image currently backing the container, looked up by
/// image id rather than by tag so a newer local pull does not mask it.
pub async fn local_digest(
    runtime: &dyn ContainerRuntime,
    record: &ContainerRecord,
) -> Result<ImageDigest, DigestError> {
    let entries = runtime
        .image_digests(&record.image_id)
        .await
        .map_err(|source| DigestError::Local {
            image: record.image.to_string(),
            source,
        })?;
    select_digest(&entries, &record.image)
        .ok_or_else(|| DigestError::NoLocalDigest(record.image.to_string()))
}

/// Pick the `RepoDigests` entry for the reference's repository, falling
/// back to the first entry when the image is known under another name.
pub(crate) fn select_digest(entries: &[String], reference: &ImageReference) -> Option<ImageDigest> {
    let wanted = reference.familiar_repository();
    let mut parsed = entries
        .iter()
        .filter_map(|entry| ImageDigest::from_repo_digest(entry));
    let first = parsed.next()?;
    if familiar_name(first.0) == wanted {
        return Some(first.1);
    }
    parsed
        .find(|(repository, _)| familiar_name(repository) == wanted)
        .map(|(_, digest)| digest)
        .or(Some(first.1))
}
