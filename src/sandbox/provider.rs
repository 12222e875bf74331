//! Sandbox trait and shared container-backed core.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::container::{ContainerHandle, ContainerLifecycleManager, ContainerStatus};
use crate::dockerfile::{self, SandboxKind};
use crate::error::Result;
use crate::project::{Layer, ProjectContext, SandboxIdentity};

/// Per-instance execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    #[default]
    Uninitialized,
    Built,
    Running,
    Exited,
}

impl From<ContainerStatus> for SandboxState {
    fn from(status: ContainerStatus) -> Self {
        match status {
            ContainerStatus::Created => SandboxState::Built,
            ContainerStatus::Running | ContainerStatus::Restarting | ContainerStatus::Paused => {
                SandboxState::Running
            }
            ContainerStatus::Exited
            | ContainerStatus::Dead
            | ContainerStatus::Removing
            | ContainerStatus::Unknown => SandboxState::Exited,
        }
    }
}

/// A per-layer container environment that executes one artifact at a time.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Container name, image tag and port of this sandbox.
    fn identity(&self) -> &SandboxIdentity;

    /// Directory holding the single current artifact.
    fn workspace(&self) -> &Path;

    fn state(&self) -> SandboxState;

    /// Handle of the container started by the last `execute`.
    fn handle(&self) -> Option<&ContainerHandle>;

    /// Address of the running service on the shared network.
    fn url(&self) -> String;

    /// Address from the host, through the published port.
    fn host_url(&self) -> String {
        format!("http://localhost:{}", self.identity().port)
    }

    /// Replaces the artifact, rebuilds from scratch and waits for steady state.
    async fn execute(
        &mut self,
        artifact: &str,
        dependencies: Option<&[String]>,
    ) -> Result<ContainerHandle>;

    /// Logs of the current container since `since`, at most `tail` lines.
    async fn recent_logs(&self, since: DateTime<Utc>, tail: usize) -> Result<String>;
}

/// Shared implementation behind every sandbox variant.
pub(crate) struct ContainerSandbox {
    identity: SandboxIdentity,
    workspace: PathBuf,
    network: String,
    kind: SandboxKind,
    lifecycle: ContainerLifecycleManager,
    state: SandboxState,
    handle: Option<ContainerHandle>,
}

impl ContainerSandbox {
    pub(crate) fn new(
        ctx: &ProjectContext,
        layer: Layer,
        kind: SandboxKind,
        port: u16,
        lifecycle: ContainerLifecycleManager,
    ) -> Result<Self> {
        let workspace = ctx.workspace(layer);
        std::fs::create_dir_all(&workspace)?;

        Ok(Self {
            identity: ctx.identity(layer, port),
            workspace,
            network: ctx.network().to_string(),
            kind,
            lifecycle,
            state: SandboxState::Uninitialized,
            handle: None,
        })
    }

    pub(crate) fn identity(&self) -> &SandboxIdentity {
        &self.identity
    }

    pub(crate) fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub(crate) fn state(&self) -> SandboxState {
        self.state
    }

    pub(crate) fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    pub(crate) fn artifact_path(&self) -> PathBuf {
        self.workspace.join(self.identity.layer.artifact_file())
    }

    /// Overwrites the current artifact file.
    pub(crate) async fn write_artifact(&self, artifact: &str) -> Result<()> {
        tokio::fs::write(self.artifact_path(), artifact).await?;
        Ok(())
    }

    /// Tears down any previous container, then builds and runs the current workspace.
    pub(crate) async fn rebuild(&mut self, dependencies: &[String]) -> Result<ContainerHandle> {
        self.state = SandboxState::Uninitialized;
        self.handle = None;

        self.lifecycle
            .remove_if_present(&self.identity.container_name, &self.identity.image_tag)
            .await?;

        let recipe = dockerfile::render(
            self.kind,
            self.identity.layer.artifact_file(),
            dependencies,
            Some(self.identity.port),
        );

        let handle = self
            .lifecycle
            .build_and_run(&self.workspace, &recipe, &self.identity, &self.network)
            .await?;
        self.state = SandboxState::Built;
        self.handle = Some(handle.clone());

        let status = self.lifecycle.await_steady_state(&handle).await?;
        self.state = status.into();

        tracing::info!(
            layer = %self.identity.layer,
            container = %self.identity.container_name,
            state = ?self.state,
            "sandbox executed"
        );
        Ok(handle)
    }

    pub(crate) async fn recent_logs(&self, since: DateTime<Utc>, tail: usize) -> Result<String> {
        match &self.handle {
            Some(handle) => self.lifecycle.recent_logs(handle, since, tail).await,
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_status_maps_onto_sandbox_state() {
        assert_eq!(SandboxState::from(ContainerStatus::Running), SandboxState::Running);
        assert_eq!(SandboxState::from(ContainerStatus::Exited), SandboxState::Exited);
        assert_eq!(SandboxState::from(ContainerStatus::Dead), SandboxState::Exited);
        assert_eq!(SandboxState::from(ContainerStatus::Created), SandboxState::Built);
    }

    #[test]
    fn sandbox_state_defaults_to_uninitialized() {
        assert_eq!(SandboxState::default(), SandboxState::Uninitialized);
        assert_eq!(
            serde_json::to_string(&SandboxState::Running).unwrap(),
            "\"running\""
        );
    }
}
