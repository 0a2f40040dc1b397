//! Scripted in-memory runtime for tests.
//!
//! Every capability call is recorded in order. `list_running` ignores the
//! server-side filter so callers' own label checks are exercised. Delays
//! run on the tokio clock, so paused-time tests advance through them.

use super::{ContainerRuntime, Registry, Result};
use crate::error::RuntimeError;
use crate::notifier::WebhookSender;
use crate::types::{
    ContainerRecord, ContainerSnapshot, ContainerSummary, ImageDigest, ImageReference, ScopeFilter,
};
use async_trait::async_trait;
use bollard::models::{
    ContainerConfig, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Inspect,
    ImageDigests,
    RemoteDigest,
    Pull,
    Tag,
    Stop,
    Remove,
    Create,
    Start,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List,
    Inspect(String),
    ImageDigests(String),
    RemoteDigest(String),
    Pull(String),
    Tag {
        image_id: String,
        reference: String,
    },
    Stop(String),
    Remove(String),
    Create {
        name: String,
        image: String,
        snapshot: ContainerSnapshot,
    },
    Start(String),
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::Pull(_)
                | Call::Tag { .. }
                | Call::Stop(_)
                | Call::Remove(_)
                | Call::Create { .. }
                | Call::Start(_)
        )
    }
}

#[derive(Default)]
struct State {
    containers: Vec<ContainerRecord>,
    /// Listed as running but gone by the time they are inspected.
    vanished: Vec<ContainerSummary>,
    /// Reference -> image id it currently points at.
    tags: HashMap<String, String>,
    /// Image id or reference -> `RepoDigests`.
    local_digests: HashMap<String, Vec<String>>,
    /// Reference -> digest served by the registry.
    remote_digests: HashMap<String, ImageDigest>,
    /// Remaining scripted failures per operation.
    failures: HashMap<Op, usize>,
    delays: HashMap<Op, Duration>,
    calls: Vec<Call>,
    created: usize,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running container whose image carries `local_digest`.
    pub fn with_container(self, record: ContainerRecord, local_digest: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.local_digests.insert(
                record.image_id.clone(),
                vec![format!("{}@{}", record.image.familiar_repository(), local_digest)],
            );
            state.containers.push(record);
        }
        self
    }

    pub fn with_vanished(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().vanished.push(ContainerSummary {
            id: id.to_string(),
            name: name.to_string(),
            labels: HashMap::new(),
        });
        self
    }

    pub fn with_remote(self, reference: &str, digest: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .remote_digests
            .insert(reference.to_string(), ImageDigest::new(digest));
        self
    }

    pub fn failing(self, op: Op) -> Self {
        self.fail_times(op, usize::MAX)
    }

    pub fn failing_once(self, op: Op) -> Self {
        self.fail_times(op, 1)
    }

    fn fail_times(self, op: Op, times: usize) -> Self {
        self.state.lock().unwrap().failures.insert(op, times);
        self
    }

    /// Make every `op` call take `delay` before answering.
    pub fn slow(self, op: Op, delay: Duration) -> Self {
        self.state.lock().unwrap().delays.insert(op, delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn containers(&self) -> Vec<ContainerRecord> {
        self.state.lock().unwrap().containers.clone()
    }

    async fn record(&self, call: Call, op: Op) -> Result<()> {
        let (result, delay) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            let result = match state.failures.get_mut(&op) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(RuntimeError::Rejected(format!("scripted {op:?} failure")))
                }
                _ => Ok(()),
            };
            (result, state.delays.get(&op).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list_running(&self, _filter: Option<&ScopeFilter>) -> Result<Vec<ContainerSummary>> {
        self.record(Call::List, Op::List).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                labels: c.labels.clone(),
            })
            .chain(state.vanished.iter().cloned())
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerRecord> {
        self.record(Call::Inspect(id.to_string()), Op::Inspect).await?;
        let state = self.state.lock().unwrap();
        state
            .containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| not_found(format!("No such container: {id}")))
    }

    async fn image_digests(&self, image: &str) -> Result<Vec<String>> {
        self.record(Call::ImageDigests(image.to_string()), Op::ImageDigests).await?;
        let state = self.state.lock().unwrap();
        state
            .local_digests
            .get(image)
            .cloned()
            .ok_or_else(|| RuntimeError::Rejected(format!("no such image: {image}")))
    }

    async fn pull_image(&self, reference: &ImageReference) -> Result<()> {
        self.record(Call::Pull(reference.to_string()), Op::Pull).await?;
        let mut state = self.state.lock().unwrap();
        state.tags.remove(reference.as_str());
        if let Some(digest) = state.remote_digests.get(reference.as_str()).cloned() {
            let entry = format!("{}@{}", reference.familiar_repository(), digest);
            state
                .local_digests
                .insert(reference.to_string(), vec![entry]);
        }
        Ok(())
    }

    async fn tag_image(&self, image_id: &str, reference: &ImageReference) -> Result<()> {
        self.record(
            Call::Tag {
                image_id: image_id.to_string(),
                reference: reference.to_string(),
            },
            Op::Tag,
        )
        .await?;
        self.state
            .lock()
            .unwrap()
            .tags
            .insert(reference.to_string(), image_id.to_string());
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout_secs: i64) -> Result<()> {
        self.record(Call::Stop(id.to_string()), Op::Stop).await
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.record(Call::Remove(id.to_string()), Op::Remove).await?;
        self.state.lock().unwrap().containers.retain(|c| c.id != id);
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        image: &str,
        snapshot: &ContainerSnapshot,
    ) -> Result<String> {
        self.record(
            Call::Create {
                name: name.to_string(),
                image: image.to_string(),
                snapshot: snapshot.clone(),
            },
            Op::Create,
        )
        .await?;
        let mut state = self.state.lock().unwrap();
        if state.containers.iter().any(|c| c.name == name) {
            return Err(RuntimeError::Rejected(format!("name {name} is already in use")));
        }
        state.created += 1;
        let id = format!("new-{}", state.created);
        // Images are resolved the way the daemon does: a tag that was moved
        // wins, otherwise the reference names the freshly pulled image.
        let image_id = state
            .tags
            .get(image)
            .cloned()
            .unwrap_or_else(|| image.to_string());
        state.containers.push(ContainerRecord {
            id: id.clone(),
            name: name.to_string(),
            image: ImageReference::parse(image),
            image_id,
            labels: snapshot.config.labels.clone().unwrap_or_default(),
            snapshot: snapshot.clone(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record(Call::Start(id.to_string()), Op::Start).await
    }
}

#[async_trait]
impl Registry for FakeRuntime {
    async fn remote_digest(&self, reference: &ImageReference) -> Result<ImageDigest> {
        self.record(Call::RemoteDigest(reference.to_string()), Op::RemoteDigest).await?;
        let state = self.state.lock().unwrap();
        state
            .remote_digests
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| RuntimeError::NoRemoteDigest(reference.to_string()))
    }
}

fn not_found(message: String) -> RuntimeError {
    RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
        status_code: 404,
        message,
    })
}

/// A container record with a representative configuration snapshot.
pub fn container(id: &str, name: &str, image: &str) -> ContainerRecord {
    let mut ports = HashMap::new();
    ports.insert(
        "80/tcp".to_string(),
        Some(vec![PortBinding {
            host_ip: Some("0.0.0.0".into()),
            host_port: Some("8080".into()),
        }]),
    );

    ContainerRecord {
        id: id.to_string(),
        name: name.to_string(),
        image: ImageReference::parse(image),
        image_id: format!("sha256:image-of-{id}"),
        labels: HashMap::new(),
        snapshot: ContainerSnapshot {
            config: ContainerConfig {
                image: Some(image.to_string()),
                env: Some(vec!["MODE=prod".into(), "TZ=UTC".into()]),
                ..Default::default()
            },
            host_config: HostConfig {
                binds: Some(vec!["/srv/data:/data".into()]),
                port_bindings: Some(ports),
                network_mode: Some("bridge".into()),
                restart_policy: Some(RestartPolicy {
                    name: Some(RestartPolicyNameEnum::ALWAYS),
                    maximum_retry_count: None,
                }),
                ..Default::default()
            },
            networks: HashMap::new(),
        },
    }
}

pub fn labelled(mut record: ContainerRecord, key: &str, value: &str) -> ContainerRecord {
    record.labels.insert(key.to_string(), value.to_string());
    record
        .snapshot
        .config
        .labels
        .get_or_insert_with(HashMap::new)
        .insert(key.to_string(), value.to_string());
    record
}

/// Webhook transport that keeps every payload instead of sending it.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(String, Value)>>,
    pub fail: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.sent.lock().unwrap().iter().map(|(_, v)| v.clone()).collect()
    }
}

#[async_trait]
impl WebhookSender for RecordingSender {
    async fn post_json(&self, url: &str, payload: &Value) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        if self.fail {
            anyhow::bail!("webhook returned 500 Internal Server Error");
        }
        Ok(())
    }
}
