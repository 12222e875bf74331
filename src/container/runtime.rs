//! Container runtime boundary.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Opaque reference to a created container.
///
/// Owned by the sandbox that created it and superseded, never mutated,
/// when the sandbox executes a new artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    id: String,
    name: String,
    image_tag: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image_tag: image_tag.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }
}

/// Lifecycle state reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Restarting,
    Paused,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    /// Parses the runtime's lowercase status word.
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "restarting" => ContainerStatus::Restarting,
            "paused" => ContainerStatus::Paused,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }

    /// Only "created" is transient; everything else counts as steady.
    pub fn is_transient(&self) -> bool {
        matches!(self, ContainerStatus::Created)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Read-only bind of a host directory into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host: PathBuf,
    pub target: String,
}

/// Everything needed to start a detached container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image_tag: String,
    pub container_name: String,
    /// Published as `port:port/tcp`.
    pub port: u16,
    pub network: String,
    pub mount: Option<BindMount>,
}

/// The primitives any container runtime must expose.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Names of networks exactly matching `name`.
    async fn list_networks(&self, name: &str) -> Result<Vec<String>>;

    /// Creates a bridge network. Fails with `AlreadyExists` on conflict.
    async fn create_network(&self, name: &str) -> Result<()>;

    /// Builds an image from `context_dir` (which contains a `Dockerfile`).
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<()>;

    /// Creates and starts a detached container.
    async fn run_container(&self, spec: &RunSpec) -> Result<ContainerHandle>;

    /// Looks up a container by exact name.
    async fn find_container(&self, name: &str) -> Result<Option<ContainerHandle>>;

    /// Current lifecycle state of a container.
    async fn inspect_status(&self, handle: &ContainerHandle) -> Result<ContainerStatus>;

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()>;

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Returns the image id for `tag`, if present.
    async fn find_image(&self, tag: &str) -> Result<Option<String>>;

    async fn remove_image(&self, tag: &str) -> Result<()>;

    /// Log text emitted since `since`, at most `tail` trailing lines.
    async fn logs_since(
        &self,
        handle: &ContainerHandle,
        since: DateTime<Utc>,
        tail: usize,
    ) -> Result<String>;

    /// Streams log lines into `output_tx` until the stream or the receiver closes.
    async fn follow_logs(
        &self,
        handle: &ContainerHandle,
        output_tx: mpsc::Sender<String>,
    ) -> Result<()>;
}
