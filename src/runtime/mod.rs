use crate::error::RuntimeError;
use crate::types::{
    ContainerRecord, ContainerSnapshot, ContainerSummary, ImageDigest, ImageReference, ScopeFilter,
};
use async_trait::async_trait;

pub mod docker;
#[cfg(test)]
pub mod fake;

pub use docker::DockerRuntime;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Container engine operations the updater depends on.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// List running containers, narrowed server-side by `filter` if set.
    async fn list_running(&self, filter: Option<&ScopeFilter>) -> Result<Vec<ContainerSummary>>;

    /// Inspect a container and capture everything needed to recreate it.
    async fn inspect_container(&self, id: &str) -> Result<ContainerRecord>;

    /// `RepoDigests` entries of a local image (`repo@sha256:...`).
    async fn image_digests(&self, image: &str) -> Result<Vec<String>>;

    /// Pull `reference`, returning only once the image is fully present.
    async fn pull_image(&self, reference: &ImageReference) -> Result<()>;

    /// Point `reference` back at a locally present image.
    async fn tag_image(&self, image_id: &str, reference: &ImageReference) -> Result<()>;

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Create a container named `name` from `snapshot`, bound to `image`.
    /// Returns the new container id.
    async fn create_container(
        &self,
        name: &str,
        image: &str,
        snapshot: &ContainerSnapshot,
    ) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;
}

/// Metadata-only registry lookups.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Digest the registry currently serves for `reference`, without
    /// downloading any layers.
    async fn remote_digest(&self, reference: &ImageReference) -> Result<ImageDigest>;
}
