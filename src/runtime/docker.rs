use super::{ContainerRuntime, Registry, Result};
use crate::error::RuntimeError;
use crate::types::{
    ContainerRecord, ContainerSnapshot, ContainerSummary, ImageDigest, ImageReference, ScopeFilter,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::{CreateImageOptions, TagImageOptions};
use bollard::models::EndpointSettings;
use bollard::network::ConnectNetworkOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Docker Engine API client, shared by every cycle.
pub struct DockerRuntime {
    docker: Docker,
    call_timeout: Duration,
    pull_timeout: Duration,
}

impl DockerRuntime {
    pub fn connect(call_timeout: Duration, pull_timeout: Duration) -> anyhow::Result<Self> {
        // Unix socket on Linux, named pipe on Windows, DOCKER_HOST if set.
        let docker = Docker::connect_with_local_defaults()?
            .with_timeout(call_timeout.max(pull_timeout));
        Ok(Self {
            docker,
            call_timeout,
            pull_timeout,
        })
    }

    async fn bounded<T, E, F>(
        &self,
        operation: &'static str,
        timeout: Duration,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<RuntimeError>,
    {
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(RuntimeError::Timeout { operation, timeout }),
        }
    }

    async fn connect_extra_networks(&self, id: &str, snapshot: &ContainerSnapshot) -> Result<()> {
        let Some(primary) = primary_network(snapshot) else {
            return Ok(());
        };
        for (network, endpoint) in &snapshot.networks {
            if network == primary {
                continue;
            }
            debug!("Connecting {} to network {}", id, network);
            let options = ConnectNetworkOptions {
                container: id.to_string(),
                endpoint_config: endpoint.clone(),
            };
            self.bounded(
                "connect network",
                self.call_timeout,
                self.docker.connect_network(network, options),
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.bounded("ping", self.call_timeout, self.docker.ping())
            .await
            .map(|_| ())
    }

    async fn list_running(&self, filter: Option<&ScopeFilter>) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        if let Some(filter) = filter {
            filters.insert("label".to_string(), vec![filter.to_string()]);
        }
        let opts = ListContainersOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };
        let containers = self
            .bounded(
                "list containers",
                self.call_timeout,
                self.docker.list_containers(Some(opts)),
            )
            .await?;

        let mut summaries = Vec::with_capacity(containers.len());
        for c in containers {
            let Some(id) = c.id else { continue };
            let name = c
                .names
                .as_ref()
                .and_then(|n| n.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.clone());
            summaries.push(ContainerSummary {
                id,
                name,
                labels: c.labels.unwrap_or_default(),
            });
        }
        Ok(summaries)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerRecord> {
        let detail = self
            .bounded(
                "inspect container",
                self.call_timeout,
                self.docker
                    .inspect_container(id, None::<InspectContainerOptions>),
            )
            .await?;

        let missing = |field| RuntimeError::MissingField(field, id.to_string());
        let container_id = detail.id.ok_or_else(|| missing("Id"))?;
        let name = detail
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .ok_or_else(|| missing("Name"))?;
        let image_id = detail.image.ok_or_else(|| missing("Image"))?;
        let config = detail.config.ok_or_else(|| missing("Config"))?;
        let host_config = detail.host_config.ok_or_else(|| missing("HostConfig"))?;
        let image = config
            .image
            .as_deref()
            .map(ImageReference::parse)
            .ok_or_else(|| missing("Config.Image"))?;
        let networks = detail
            .network_settings
            .and_then(|s| s.networks)
            .unwrap_or_default()
            .into_iter()
            .map(|(network, endpoint)| (network, reusable_endpoint(&endpoint, &container_id)))
            .collect();

        Ok(ContainerRecord {
            id: container_id,
            name,
            image,
            image_id,
            labels: config.labels.clone().unwrap_or_default(),
            snapshot: ContainerSnapshot {
                config,
                host_config,
                networks,
            },
        })
    }

    async fn image_digests(&self, image: &str) -> Result<Vec<String>> {
        let inspect = self
            .bounded(
                "inspect image",
                self.call_timeout,
                self.docker.inspect_image(image),
            )
            .await?;
        Ok(inspect.repo_digests.unwrap_or_default())
    }

    async fn pull_image(&self, reference: &ImageReference) -> Result<()> {
        let options = CreateImageOptions {
            from_image: reference.repository(),
            tag: reference.tag(),
            ..Default::default()
        };

        let pull = async {
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(result) = stream.next().await {
                let info = result?;
                if let Some(status) = info.status {
                    debug!("Pull status: {}", status);
                }
            }
            Ok::<_, bollard::errors::Error>(())
        };
        self.bounded("pull image", self.pull_timeout, pull).await
    }

    async fn tag_image(&self, image_id: &str, reference: &ImageReference) -> Result<()> {
        let options = TagImageOptions {
            repo: reference.repository(),
            tag: reference.tag(),
        };
        self.bounded(
            "tag image",
            self.call_timeout,
            self.docker.tag_image(image_id, Some(options)),
        )
        .await
    }

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()> {
        let options = StopContainerOptions { t: timeout_secs };
        // The call itself may legitimately take the whole grace period.
        let timeout = self.call_timeout + Duration::from_secs(timeout_secs.max(0) as u64);
        match self
            .bounded(
                "stop container",
                timeout,
                self.docker.stop_container(id, Some(options)),
            )
            .await
        {
            Err(RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code: 304,
                ..
            })) => {
                info!("Container {} already stopped", id);
                Ok(())
            }
            other => other,
        }
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: false,
            ..Default::default()
        };
        match self
            .bounded(
                "remove container",
                self.call_timeout,
                self.docker.remove_container(id, Some(options)),
            )
            .await
        {
            Err(RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            })) => {
                warn!("Container {} already gone, skipping removal", id);
                Ok(())
            }
            other => other,
        }
    }

    async fn create_container(
        &self,
        name: &str,
        image: &str,
        snapshot: &ContainerSnapshot,
    ) -> Result<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            ..Default::default()
        };
        let response = self
            .bounded(
                "create container",
                self.call_timeout,
                self.docker
                    .create_container(Some(options), create_config(image, snapshot)),
            )
            .await?;
        for warning in &response.warnings {
            warn!("Creating {}: {}", name, warning);
        }

        self.connect_extra_networks(&response.id, snapshot).await?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.bounded(
            "start container",
            self.call_timeout,
            self.docker
                .start_container(id, None::<StartContainerOptions<String>>),
        )
        .await
    }
}

#[async_trait]
impl Registry for DockerRuntime {
    async fn remote_digest(&self, reference: &ImageReference) -> Result<ImageDigest> {
        // Distribution endpoint: the daemon asks the registry for the
        // manifest descriptor only.
        let inspect = self
            .bounded(
                "inspect registry manifest",
                self.call_timeout,
                self.docker.inspect_registry_image(reference.as_str(), None),
            )
            .await?;
        inspect
            .descriptor
            .digest
            .filter(|d| !d.is_empty())
            .map(ImageDigest::new)
            .ok_or_else(|| RuntimeError::NoRemoteDigest(reference.to_string()))
    }
}

/// Network the container is attached to at create time.
fn primary_network(snapshot: &ContainerSnapshot) -> Option<&str> {
    match snapshot.network_mode() {
        None | Some("") | Some("default") => Some("bridge"),
        Some("host") | Some("none") => None,
        Some(mode) if mode.starts_with("container:") => None,
        Some(mode) => Some(mode),
    }
}

/// Endpoint settings that can be replayed onto a new container: the
/// runtime-assigned addresses and ids are dropped, as is the alias Docker
/// derives from the old container id.
fn reusable_endpoint(endpoint: &EndpointSettings, container_id: &str) -> EndpointSettings {
    let aliases = endpoint.aliases.as_ref().map(|aliases| {
        aliases
            .iter()
            .filter(|alias| !container_id.starts_with(alias.as_str()))
            .cloned()
            .collect()
    });
    EndpointSettings {
        ipam_config: endpoint.ipam_config.clone(),
        links: endpoint.links.clone(),
        aliases,
        driver_opts: endpoint.driver_opts.clone(),
        ..Default::default()
    }
}

/// Build the create request for `snapshot`, identical except for the image.
pub(crate) fn create_config(image: &str, snapshot: &ContainerSnapshot) -> Config<String> {
    let config = &snapshot.config;
    let networking_config = primary_network(snapshot)
        .and_then(|network| snapshot.networks.get_key_value(network))
        .map(|(network, endpoint)| NetworkingConfig {
            endpoints_config: HashMap::from([(network.clone(), endpoint.clone())]),
        });

    // The daemon rejects an explicit hostname when sharing another
    // container's network namespace.
    let hostname = match snapshot.network_mode() {
        Some(mode) if mode.starts_with("container:") => None,
        _ => config.hostname.clone(),
    };

    Config {
        hostname,
        domainname: config.domainname.clone(),
        user: config.user.clone(),
        attach_stdin: config.attach_stdin,
        attach_stdout: config.attach_stdout,
        attach_stderr: config.attach_stderr,
        exposed_ports: config.exposed_ports.clone(),
        tty: config.tty,
        open_stdin: config.open_stdin,
        stdin_once: config.stdin_once,
        env: config.env.clone(),
        cmd: config.cmd.clone(),
        healthcheck: config.healthcheck.clone(),
        args_escaped: config.args_escaped,
        image: Some(image.to_string()),
        volumes: config.volumes.clone(),
        working_dir: config.working_dir.clone(),
        entrypoint: config.entrypoint.clone(),
        network_disabled: config.network_disabled,
        on_build: config.on_build.clone(),
        labels: config.labels.clone(),
        stop_signal: config.stop_signal.clone(),
        stop_timeout: config.stop_timeout,
        shell: config.shell.clone(),
        host_config: Some(snapshot.host_config.clone()),
        networking_config,
        ..Default::default()
    }
}
