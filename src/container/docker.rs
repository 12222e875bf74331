//! Docker runtime backed by the bollard API client.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::models::{HostConfig, PortBinding};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::runtime::{ContainerHandle, ContainerRuntime, ContainerStatus, RunSpec};

/// [`ContainerRuntime`] talking to the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects with local defaults and verifies the daemon answers.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::runtime("connect to docker", e))?;

        docker.ping().await.map_err(|e| {
            tracing::error!(error = %e, "docker daemon is not reachable");
            Error::runtime("ping docker", e)
        })?;

        tracing::info!("connected to docker daemon");
        Ok(Self { docker })
    }
}

/// Maps 404 and 409 to the absence/conflict classes; everything else is tagged.
fn map_err(op: &'static str) -> impl Fn(BollardError) -> Error {
    move |e| match e {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => Error::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => Error::AlreadyExists(message),
        other => Error::runtime(op, other),
    }
}

/// Tars the build context in memory.
fn pack_context(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_networks(&self, name: &str) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("name", vec![name]);

        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(map_err("list networks"))?;

        // The name filter is a substring match.
        Ok(networks
            .into_iter()
            .filter_map(|n| n.name)
            .filter(|n| n == name)
            .collect())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            check_duplicate: true,
            ..Default::default()
        };

        self.docker
            .create_network(options)
            .await
            .map_err(map_err("create network"))?;
        Ok(())
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<()> {
        let dir = context_dir.to_path_buf();
        let tarball = tokio::task::spawn_blocking(move || pack_context(&dir))
            .await
            .map_err(|e| Error::runtime("pack build context", e))??;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(tarball.into()));
        while let Some(item) = stream.next().await {
            let info = item.map_err(map_err("build image"))?;
            if let Some(error) = info.error {
                return Err(Error::runtime("build image", error));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!(target: "agentcy::container", tag = %tag, "{}", line);
                }
            }
        }

        tracing::info!(tag = %tag, "image built");
        Ok(())
    }

    async fn run_container(&self, spec: &RunSpec) -> Result<ContainerHandle> {
        let port_key = format!("{}/tcp", spec.port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(spec.port.to_string()),
            }]),
        );

        let binds = spec
            .mount
            .as_ref()
            .map(|m| vec![format!("{}:{}:ro", m.host.display(), m.target)]);

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds,
            network_mode: Some(spec.network.clone()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image_tag.clone()),
            exposed_ports: Some(exposed_ports),
            working_dir: spec.mount.as_ref().map(|m| m.target.clone()),
            host_config: Some(host_config),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.container_name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_err("create container"))?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_err("start container"))?;

        Ok(ContainerHandle::new(
            response.id,
            spec.container_name.clone(),
            spec.image_tag.clone(),
        ))
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerHandle>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => {
                // Inspect also resolves id prefixes; require the exact name.
                let exact = info
                    .name
                    .as_deref()
                    .map(|n| n.trim_start_matches('/') == name)
                    .unwrap_or(false);
                if !exact {
                    return Ok(None);
                }
                let image = info.config.and_then(|c| c.image).unwrap_or_default();
                Ok(Some(ContainerHandle::new(
                    info.id.unwrap_or_else(|| name.to_string()),
                    name,
                    image,
                )))
            }
            Err(e) => match map_err("inspect container")(e) {
                Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn inspect_status(&self, handle: &ContainerHandle) -> Result<ContainerStatus> {
        let info = self
            .docker
            .inspect_container(handle.id(), None::<InspectContainerOptions>)
            .await
            .map_err(map_err("inspect container"))?;

        Ok(info
            .state
            .and_then(|s| s.status)
            .map(|s| ContainerStatus::parse(&s.to_string()))
            .unwrap_or(ContainerStatus::Unknown))
    }

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()> {
        match self
            .docker
            .stop_container(handle.id(), None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_err("stop container")(e)),
        }
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(handle.id(), Some(options))
            .await
            .map_err(map_err("remove container"))
    }

    async fn find_image(&self, tag: &str) -> Result<Option<String>> {
        match self.docker.inspect_image(tag).await {
            Ok(image) => Ok(Some(image.id.unwrap_or_else(|| tag.to_string()))),
            Err(e) => match map_err("inspect image")(e) {
                Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn remove_image(&self, tag: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_image(tag, Some(options), None)
            .await
            .map_err(map_err("remove image"))?;
        Ok(())
    }

    async fn logs_since(
        &self,
        handle: &ContainerHandle,
        since: DateTime<Utc>,
        tail: usize,
    ) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            since: since.timestamp(),
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(handle.id(), Some(options));
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let output = chunk.map_err(map_err("fetch logs"))?;
            text.push_str(&String::from_utf8_lossy(&output.into_bytes()));
        }
        Ok(text)
    }

    async fn follow_logs(
        &self,
        handle: &ContainerHandle,
        output_tx: mpsc::Sender<String>,
    ) -> Result<()> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut stream = self.docker.logs(handle.id(), Some(options));
        while let Some(chunk) = stream.next().await {
            let output = chunk.map_err(map_err("follow logs"))?;
            let text = String::from_utf8_lossy(&output.into_bytes()).to_string();
            for line in text.lines() {
                if output_tx.send(line.to_string()).await.is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
