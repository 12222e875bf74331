//! Build, run, reset and tear down per-layer containers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::backoff::ExponentialBackoff;
use crate::dockerfile::Recipe;
use crate::error::{Error, Result};
use crate::project::SandboxIdentity;

use super::runtime::{BindMount, ContainerHandle, ContainerRuntime, ContainerStatus, RunSpec};

/// How state polling is paced and bounded.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Hard deadline for leaving the "created" state.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Drives a [`ContainerRuntime`] through the sandbox lifecycle.
///
/// Failures other than absence/conflict propagate unchanged; retry policy
/// belongs to the caller.
#[derive(Clone)]
pub struct ContainerLifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    policy: PollPolicy,
}

impl ContainerLifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, policy: PollPolicy) -> Self {
        Self { runtime, policy }
    }

    /// Creates the bridge network `name` unless it already exists.
    ///
    /// Returns true if this call created it.
    pub async fn ensure_network(&self, name: &str) -> Result<bool> {
        if !self.runtime.list_networks(name).await?.is_empty() {
            tracing::debug!(network = %name, "network already present");
            return Ok(false);
        }

        match self.runtime.create_network(name).await {
            Ok(()) => {
                tracing::info!(network = %name, "created network");
                Ok(true)
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!(network = %name, "network created concurrently");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Stops and removes the container and image if they exist.
    pub async fn remove_if_present(&self, container_name: &str, image_tag: &str) -> Result<()> {
        match self.runtime.find_container(container_name).await? {
            Some(handle) => {
                ignore_absent(self.runtime.stop_container(&handle).await)?;
                ignore_absent(self.runtime.remove_container(&handle).await)?;
                tracing::info!(container = %container_name, "removed container");
            }
            None => tracing::info!(container = %container_name, "no container to remove"),
        }

        match self.runtime.find_image(image_tag).await? {
            Some(_) => {
                ignore_absent(self.runtime.remove_image(image_tag).await)?;
                tracing::info!(image = %image_tag, "removed image");
            }
            None => tracing::info!(image = %image_tag, "no image to remove"),
        }

        Ok(())
    }

    /// Writes the recipe, builds the image and starts a detached container.
    ///
    /// Returns as soon as the runtime accepts the run request.
    pub async fn build_and_run(
        &self,
        workspace: &Path,
        recipe: &Recipe,
        identity: &SandboxIdentity,
        network: &str,
    ) -> Result<ContainerHandle> {
        tokio::fs::write(workspace.join("Dockerfile"), &recipe.dockerfile).await?;

        self.runtime
            .build_image(workspace, &identity.image_tag)
            .await?;

        let mount = match &recipe.workdir {
            Some(target) => Some(BindMount {
                host: tokio::fs::canonicalize(workspace).await?,
                target: target.clone(),
            }),
            None => None,
        };

        let spec = RunSpec {
            image_tag: identity.image_tag.clone(),
            container_name: identity.container_name.clone(),
            port: recipe.port,
            network: network.to_string(),
            mount,
        };

        let handle = self.runtime.run_container(&spec).await?;
        tracing::info!(
            container = %handle.name(),
            image = %handle.image_tag(),
            port = recipe.port,
            "container started"
        );
        Ok(handle)
    }

    /// Polls until the container leaves the "created" state.
    ///
    /// A background task follows the container's log stream while polling;
    /// its failure never affects the poll.
    pub async fn await_steady_state(&self, handle: &ContainerHandle) -> Result<ContainerStatus> {
        let follower = self.spawn_log_follower(handle);

        let deadline = Instant::now() + self.policy.timeout;
        let mut backoff = ExponentialBackoff::new(self.policy.initial, self.policy.max);

        let result = loop {
            match self.runtime.inspect_status(handle).await {
                Ok(status) if !status.is_transient() => break Ok(status),
                Ok(_) => {}
                Err(e) => break Err(e),
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    container = %handle.name(),
                    timeout_secs = self.policy.timeout.as_secs(),
                    "container stuck in created state"
                );
                break Err(Error::SteadyStateTimeout {
                    container: handle.name().to_string(),
                    secs: self.policy.timeout.as_secs(),
                });
            }

            tokio::time::sleep(backoff.current()).await;
            backoff.next();
        };

        follower.abort();

        if let Ok(status) = &result {
            tracing::info!(container = %handle.name(), status = %status, "container settled");
        }
        result
    }

    /// Log text emitted since `since`, at most `tail` trailing lines.
    pub async fn recent_logs(
        &self,
        handle: &ContainerHandle,
        since: DateTime<Utc>,
        tail: usize,
    ) -> Result<String> {
        let text = self.runtime.logs_since(handle, since, tail).await?;
        Ok(tail_lines(&text, tail))
    }

    fn spawn_log_follower(&self, handle: &ContainerHandle) -> tokio::task::JoinHandle<()> {
        let runtime = Arc::clone(&self.runtime);
        let handle = handle.clone();

        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel::<String>(64);
            let name = handle.name().to_string();

            let drain = async {
                while let Some(line) = rx.recv().await {
                    tracing::debug!(target: "agentcy::container", container = %name, "{}", line);
                }
            };

            let (streamed, ()) = tokio::join!(runtime.follow_logs(&handle, tx), drain);
            if let Err(e) = streamed {
                tracing::debug!(container = %handle.name(), error = %e, "log stream ended");
            }
        })
    }
}

/// Absent targets are the expected state during teardown.
fn ignore_absent(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            tracing::debug!(error = %e, "teardown target already gone");
            Ok(())
        }
        other => other,
    }
}

/// Keeps the last `n` lines of `text`.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dockerfile::{render, SandboxKind};
    use crate::project::Layer;
    use crate::testing::FakeRuntime;
    use tempfile::TempDir;

    fn manager(runtime: &Arc<FakeRuntime>) -> ContainerLifecycleManager {
        let runtime: Arc<dyn ContainerRuntime> = runtime.clone();
        ContainerLifecycleManager::new(
            runtime,
            PollPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(10),
                timeout: Duration::from_millis(200),
            },
        )
    }

    fn identity(name: &str) -> SandboxIdentity {
        SandboxIdentity {
            project: "QuickPoll_abcd".to_string(),
            layer: Layer::Service,
            container_name: name.to_string(),
            image_tag: format!("{}:latest", name),
            port: 8000,
        }
    }

    #[tokio::test]
    async fn ensure_network_twice_creates_exactly_one() {
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime);

        assert!(lifecycle.ensure_network("Agentcy").await.unwrap());
        assert!(!lifecycle.ensure_network("Agentcy").await.unwrap());
        assert_eq!(runtime.network_count("Agentcy"), 1);
    }

    #[tokio::test]
    async fn ensure_network_tolerates_concurrent_creation() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_network_conflict(true);
        let lifecycle = manager(&runtime);

        let created = lifecycle.ensure_network("Agentcy").await.unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn remove_if_present_is_a_repeatable_no_op_when_absent() {
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime);

        lifecycle.remove_if_present("backend", "backend:latest").await.unwrap();
        lifecycle.remove_if_present("backend", "backend:latest").await.unwrap();
        assert!(runtime.containers_named("backend").is_empty());
    }

    #[tokio::test]
    async fn stale_container_is_replaced_by_exactly_one_new_container() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.seed_container("backend", "backend:old");
        let lifecycle = manager(&runtime);

        let workspace = TempDir::new().unwrap();
        std::fs::write(workspace.path().join("index.py"), "print('hi')").unwrap();
        let recipe = render(SandboxKind::InterpretedService, "index.py", &[], None);
        let id = identity("backend");

        lifecycle
            .remove_if_present(&id.container_name, &id.image_tag)
            .await
            .unwrap();
        let handle = lifecycle
            .build_and_run(workspace.path(), &recipe, &id, "Agentcy")
            .await
            .unwrap();

        let named = runtime.containers_named("backend");
        assert_eq!(named.len(), 1);
        assert_eq!(named[0], "backend:latest");
        assert_eq!(handle.image_tag(), "backend:latest");
        assert!(workspace.path().join("Dockerfile").exists());
    }

    #[tokio::test]
    async fn workspace_is_mounted_read_only_at_recipe_workdir() {
        let runtime = Arc::new(FakeRuntime::new());
        let lifecycle = manager(&runtime);
        let workspace = TempDir::new().unwrap();
        let recipe = render(SandboxKind::ContentServer, "index.html", &[], None);

        lifecycle
            .build_and_run(workspace.path(), &recipe, &identity("frontend"), "Agentcy")
            .await
            .unwrap();

        let spec = runtime.last_run_spec().unwrap();
        assert_eq!(spec.port, 80);
        assert_eq!(spec.network, "Agentcy");
        let mount = spec.mount.unwrap();
        assert_eq!(mount.target, "/usr/share/nginx/html");
        assert!(mount.host.is_absolute());
    }

    #[tokio::test]
    async fn build_failure_propagates_tagged() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_builds("pip: no matching distribution");
        let lifecycle = manager(&runtime);
        let workspace = TempDir::new().unwrap();
        let recipe = render(SandboxKind::InterpretedService, "index.py", &[], None);

        let err = lifecycle
            .build_and_run(workspace.path(), &recipe, &identity("backend"), "Agentcy")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Runtime { op: "build image", .. }));
        assert!(err.to_string().contains("no matching distribution"));
    }

    #[tokio::test]
    async fn await_steady_state_waits_out_created_polls() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_created_polls(3);
        let lifecycle = manager(&runtime);
        let workspace = TempDir::new().unwrap();
        let recipe = render(SandboxKind::InterpretedService, "index.py", &[], None);

        let handle = lifecycle
            .build_and_run(workspace.path(), &recipe, &identity("backend"), "Agentcy")
            .await
            .unwrap();
        let status = lifecycle.await_steady_state(&handle).await.unwrap();

        assert_eq!(status, ContainerStatus::Running);
        assert!(runtime.status_polls() >= 4);
    }

    #[tokio::test]
    async fn broken_log_stream_does_not_affect_steady_state() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_follow_logs();
        let lifecycle = manager(&runtime);
        let workspace = TempDir::new().unwrap();
        let recipe = render(SandboxKind::InterpretedService, "index.py", &[], None);

        let handle = lifecycle
            .build_and_run(workspace.path(), &recipe, &identity("backend"), "Agentcy")
            .await
            .unwrap();
        let status = lifecycle.await_steady_state(&handle).await;

        assert_eq!(status.unwrap(), ContainerStatus::Running);
    }

    #[tokio::test]
    async fn await_steady_state_gives_up_at_deadline() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_created_polls(usize::MAX);
        let lifecycle = manager(&runtime);
        let workspace = TempDir::new().unwrap();
        let recipe = render(SandboxKind::InterpretedService, "index.py", &[], None);

        let handle = lifecycle
            .build_and_run(workspace.path(), &recipe, &identity("backend"), "Agentcy")
            .await
            .unwrap();
        let err = lifecycle.await_steady_state(&handle).await.unwrap_err();

        assert!(matches!(err, Error::SteadyStateTimeout { .. }));
    }

    #[tokio::test]
    async fn recent_logs_are_truncated_to_tail() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_log_lines(vec!["one", "two", "three", "four"]);
        let lifecycle = manager(&runtime);
        let workspace = TempDir::new().unwrap();
        let recipe = render(SandboxKind::InterpretedService, "index.py", &[], None);

        let since = Utc::now() - chrono::Duration::seconds(1);
        let handle = lifecycle
            .build_and_run(workspace.path(), &recipe, &identity("backend"), "Agentcy")
            .await
            .unwrap();
        let logs = lifecycle.recent_logs(&handle, since, 2).await.unwrap();

        assert_eq!(logs, "three\nfour");
    }

    #[test]
    fn tail_lines_keeps_everything_when_short() {
        assert_eq!(tail_lines("a\nb", 10), "a\nb");
        assert_eq!(tail_lines("", 3), "");
        assert_eq!(tail_lines("a\nb\nc", 0), "");
    }
}
