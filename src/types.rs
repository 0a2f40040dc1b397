//! Data structures used throughout the update engine.
//!
//! Everything here is built fresh at the start of a cycle from the
//! runtime's current state and dropped at the end of it.  Nothing is
//! cached between cycles.

use std::collections::HashMap;
use std::fmt;

use bollard::models::{ContainerConfig, EndpointSettings, HostConfig};

use crate::error::{ConfigError, RecreateError};

/// A parsed image reference such as `registry:5000/team/app:1.0@sha256:...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    raw: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (name, digest) = match raw.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (raw, None),
        };

        // A colon before the last slash belongs to a registry port, not a tag.
        let tag_start = name.rfind(':').filter(|&colon| !name[colon + 1..].contains('/'));
        let (repository, tag) = match tag_start {
            Some(colon) => (&name[..colon], Some(name[colon + 1..].to_string())),
            None => (name, None),
        };

        Self {
            raw: raw.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag to pull; `latest` when the reference carries none.
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    /// The digest the reference is pinned to, if any.
    pub fn pinned_digest(&self) -> Option<ImageDigest> {
        self.digest.as_deref().map(ImageDigest::new)
    }

    /// Repository name as the Docker daemon reports it in `RepoDigests`:
    /// Docker Hub host and the `library/` namespace are dropped.
    pub fn familiar_repository(&self) -> &str {
        familiar_name(&self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

pub(crate) fn familiar_name(repository: &str) -> &str {
    let name = repository
        .strip_prefix("docker.io/")
        .or_else(|| repository.strip_prefix("index.docker.io/"))
        .unwrap_or(repository);
    name.strip_prefix("library/").unwrap_or(name)
}

/// Content-addressed identifier of an image manifest. Compared for
/// equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDigest(String);

impl ImageDigest {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Extract the digest part of a `RepoDigests` entry (`repo@sha256:...`).
    pub fn from_repo_digest(entry: &str) -> Option<(&str, Self)> {
        let (repository, digest) = entry.split_once('@')?;
        if digest.is_empty() {
            return None;
        }
        Some((repository, Self::new(digest)))
    }
}

impl fmt::Display for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A running container as reported by the runtime's list call, before
/// the full inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Everything needed to create an equivalent container later.
///
/// `config` and `host_config` are kept exactly as the runtime reported
/// them; only the image changes on recreation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSnapshot {
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    pub networks: HashMap<String, EndpointSettings>,
}

impl ContainerSnapshot {
    pub fn env(&self) -> &[String] {
        self.config.env.as_deref().unwrap_or_default()
    }

    pub fn network_mode(&self) -> Option<&str> {
        self.host_config.network_mode.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: ImageReference,
    /// Id of the local image currently backing the container.
    pub image_id: String,
    pub labels: HashMap<String, String>,
    pub snapshot: ContainerSnapshot,
}

/// Optional `key=value` label constraint selecting managed containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    pub key: String,
    pub value: String,
}

impl ScopeFilter {
    /// Parse a `LABEL_ENABLE` value. Empty means no filter; a pair with an
    /// empty key or value is rejected.
    pub fn parse(raw: &str) -> Result<Option<Self>, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        match raw.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
                Ok(Some(Self {
                key: key.trim().to_string(),
                    value: value.trim().to_string(),
                }))
            }
            _ => Err(ConfigError::InvalidLabelFilter(raw.to_string())),
        }
    }

    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        labels.get(&self.key) == Some(&self.value)
    }
}

impl fmt::Display for ScopeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    UpToDate,
    Stale {
        local: ImageDigest,
        remote: ImageDigest,
    },
    /// A digest lookup failed; handled like up-to-date for this cycle.
    Undetermined(String),
}

impl UpdateDecision {
    pub fn compare(local: &ImageDigest, remote: &ImageDigest) -> Self {
        if local == remote {
            UpdateDecision::UpToDate
        } else {
            UpdateDecision::Stale {
                local: local.clone(),
                remote: remote.clone(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UpToDate,
    Undetermined(String),
    DryRun,
    AutoUpdateDisabled,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Skipped(SkipReason),
    Succeeded { new_id: String },
    Failed(RecreateError),
}
