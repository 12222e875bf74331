//! In-memory doubles for the container runtime and the generator.
//!
//! Used by unit tests and by the integration tests under `tests/`.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::container::{ContainerHandle, ContainerRuntime, ContainerStatus, RunSpec};
use crate::error::{Error, Result};
use crate::generator::{Generator, Role, RoleMemory};
use crate::presentation::{self, PresentationHandle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct FakeContainer {
    id: String,
    name: String,
    image_tag: String,
    created_polls_left: usize,
}

#[derive(Default)]
struct FakeState {
    networks: Vec<String>,
    network_conflict: bool,
    images: HashMap<String, String>,
    containers: Vec<FakeContainer>,
    next_id: u64,
    created_polls: usize,
    final_status: Option<ContainerStatus>,
    build_failure: Option<(String, usize)>,
    log_lines: Vec<String>,
    fail_logs: bool,
    fail_follow_logs: bool,
    runs: HashMap<String, usize>,
    status_polls: usize,
    last_run: Option<RunSpec>,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:08x}", prefix, self.next_id)
    }

    fn container_by_id(&mut self, id: &str) -> Option<&mut FakeContainer> {
        self.containers.iter_mut().find(|c| c.id == id)
    }
}

/// A [`ContainerRuntime`] that keeps networks, images and containers in memory.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a container (and its image) left over from an earlier session.
    pub fn seed_container(&self, name: &str, image_tag: &str) {
        let mut state = lock(&self.state);
        let image_id = state.next_id("sha256:");
        state.images.insert(image_tag.to_string(), image_id);
        let id = state.next_id("");
        state.containers.push(FakeContainer {
            id,
            name: name.to_string(),
            image_tag: image_tag.to_string(),
            created_polls_left: 0,
        });
    }

    /// Simulates another caller creating the network between list and create.
    pub fn set_network_conflict(&self, conflict: bool) {
        lock(&self.state).network_conflict = conflict;
    }

    /// Number of polls a new container reports "created" before it runs.
    pub fn set_created_polls(&self, polls: usize) {
        lock(&self.state).created_polls = polls;
    }

    /// Status reported once a container leaves "created".
    pub fn set_final_status(&self, status: ContainerStatus) {
        lock(&self.state).final_status = Some(status);
    }

    /// Every build fails with `message`.
    pub fn fail_builds(&self, message: &str) {
        self.fail_builds_times(message, usize::MAX);
    }

    /// The next `times` builds fail with `message`.
    pub fn fail_builds_times(&self, message: &str, times: usize) {
        lock(&self.state).build_failure = Some((message.to_string(), times));
    }

    /// Log output of every container.
    pub fn set_log_lines(&self, lines: Vec<&str>) {
        lock(&self.state).log_lines = lines.into_iter().map(String::from).collect();
    }

    /// Makes `logs_since` fail.
    pub fn fail_logs(&self) {
        lock(&self.state).fail_logs = true;
    }

    /// Makes the log stream fail as soon as it is opened.
    pub fn fail_follow_logs(&self) {
        lock(&self.state).fail_follow_logs = true;
    }

    pub fn network_count(&self, name: &str) -> usize {
        lock(&self.state)
            .networks
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }

    /// Image tags of the live containers named `name`.
    pub fn containers_named(&self, name: &str) -> Vec<String> {
        lock(&self.state)
            .containers
            .iter()
            .filter(|c| c.name == name)
            .map(|c| c.image_tag.clone())
            .collect()
    }

    /// How many containers named `name` were started.
    pub fn run_count(&self, name: &str) -> usize {
        lock(&self.state).runs.get(name).copied().unwrap_or(0)
    }

    pub fn total_runs(&self) -> usize {
        lock(&self.state).runs.values().sum()
    }

    pub fn status_polls(&self) -> usize {
        lock(&self.state).status_polls
    }

    pub fn last_run_spec(&self) -> Option<RunSpec> {
        lock(&self.state).last_run.clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_networks(&self, name: &str) -> Result<Vec<String>> {
        let state = lock(&self.state);
        if state.network_conflict {
            return Ok(Vec::new());
        }
        Ok(state
            .networks
            .iter()
            .filter(|n| n.as_str() == name)
            .cloned()
            .collect())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.network_conflict || state.networks.iter().any(|n| n == name) {
            return Err(Error::AlreadyExists(format!("network {}", name)));
        }
        state.networks.push(name.to_string());
        Ok(())
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<()> {
        let mut state = lock(&self.state);

        if let Some((message, remaining)) = state.build_failure.as_mut() {
            if *remaining > 0 {
                let message = message.clone();
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                return Err(Error::runtime("build image", message));
            }
        }

        if !context_dir.join("Dockerfile").exists() {
            return Err(Error::runtime("build image", "Dockerfile not found in context"));
        }

        let id = state.next_id("sha256:");
        state.images.insert(tag.to_string(), id);
        Ok(())
    }

    async fn run_container(&self, spec: &RunSpec) -> Result<ContainerHandle> {
        let mut state = lock(&self.state);

        if state.containers.iter().any(|c| c.name == spec.container_name) {
            return Err(Error::AlreadyExists(format!(
                "container name {} is already in use",
                spec.container_name
            )));
        }
        if !state.images.contains_key(&spec.image_tag) {
            return Err(Error::NotFound(format!("image {}", spec.image_tag)));
        }

        let id = state.next_id("");
        let created_polls_left = state.created_polls;
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.container_name.clone(),
            image_tag: spec.image_tag.clone(),
            created_polls_left,
        });
        *state.runs.entry(spec.container_name.clone()).or_insert(0) += 1;
        state.last_run = Some(spec.clone());

        Ok(ContainerHandle::new(
            id,
            spec.container_name.clone(),
            spec.image_tag.clone(),
        ))
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerHandle>> {
        Ok(lock(&self.state)
            .containers
            .iter()
            .find(|c| c.name == name)
            .map(|c| ContainerHandle::new(c.id.clone(), c.name.clone(), c.image_tag.clone())))
    }

    async fn inspect_status(&self, handle: &ContainerHandle) -> Result<ContainerStatus> {
        let mut state = lock(&self.state);
        state.status_polls += 1;
        let final_status = state.final_status.unwrap_or(ContainerStatus::Running);

        let container = state
            .container_by_id(handle.id())
            .ok_or_else(|| Error::NotFound(format!("container {}", handle.name())))?;

        if container.created_polls_left > 0 {
            container.created_polls_left -= 1;
            return Ok(ContainerStatus::Created);
        }
        Ok(final_status)
    }

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()> {
        let mut state = lock(&self.state);
        match state.container_by_id(handle.id()) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("container {}", handle.name()))),
        }
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()> {
        let mut state = lock(&self.state);
        let before = state.containers.len();
        state.containers.retain(|c| c.id != handle.id());
        if state.containers.len() == before {
            return Err(Error::NotFound(format!("container {}", handle.name())));
        }
        Ok(())
    }

    async fn find_image(&self, tag: &str) -> Result<Option<String>> {
        Ok(lock(&self.state).images.get(tag).cloned())
    }

    async fn remove_image(&self, tag: &str) -> Result<()> {
        match lock(&self.state).images.remove(tag) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("image {}", tag))),
        }
    }

    async fn logs_since(
        &self,
        handle: &ContainerHandle,
        _since: DateTime<Utc>,
        _tail: usize,
    ) -> Result<String> {
        let mut state = lock(&self.state);
        if state.fail_logs {
            return Err(Error::runtime("fetch logs", "log driver does not support reading"));
        }
        if state.container_by_id(handle.id()).is_none() {
            return Err(Error::NotFound(format!("container {}", handle.name())));
        }
        Ok(state.log_lines.join("\n"))
    }

    async fn follow_logs(
        &self,
        _handle: &ContainerHandle,
        output_tx: mpsc::Sender<String>,
    ) -> Result<()> {
        let lines = {
            let state = lock(&self.state);
            if state.fail_follow_logs {
                return Err(Error::runtime("follow logs", "connection reset by peer"));
            }
            state.log_lines.clone()
        };
        for line in lines {
            if output_tx.send(line).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct Script {
    replies: HashMap<Role, VecDeque<String>>,
    prompts: Vec<(Role, String)>,
}

/// A [`Generator`] that replays queued replies per role and records prompts.
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<Script>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next reply for `role`.
    pub fn push(&self, role: Role, reply: impl Into<String>) {
        lock(&self.script)
            .replies
            .entry(role)
            .or_default()
            .push_back(reply.into());
    }

    /// Prompts `role` received, in order.
    pub fn prompts(&self, role: Role) -> Vec<String> {
        lock(&self.script)
            .prompts
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn calls(&self, role: Role) -> usize {
        self.prompts(role).len()
    }

    /// Replies still queued across all roles.
    pub fn remaining(&self) -> usize {
        lock(&self.script).replies.values().map(VecDeque::len).sum()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn produce(&self, role: Role, prompt: &str, _memory: &RoleMemory) -> Result<String> {
        let mut script = lock(&self.script);
        script.prompts.push((role, prompt.to_string()));
        script
            .replies
            .get_mut(&role)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| Error::Generator(format!("no scripted reply left for {}", role)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A fenced code block reply.
pub fn fenced(language: &str, body: &str) -> String {
    format!("Here is the code:\n```{}\n{}\n```\n", language, body)
}

/// An accepting verdict envelope.
pub fn accept(feedback: &str) -> String {
    envelope(true, feedback)
}

/// A rejecting verdict envelope.
pub fn reject(feedback: &str) -> String {
    envelope(false, feedback)
}

fn envelope(accepted: bool, feedback: &str) -> String {
    let body = serde_json::json!({ "accepted": accepted, "feedback": feedback });
    format!("```json\n{}\n```", body)
}

/// A message seen by a test front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presented {
    pub sender: String,
    pub text: String,
    pub question: bool,
}

/// Front-end that records every message and answers questions from `answers` in order.
///
/// The returned task resolves once the pipeline drops its handle.
pub fn scripted_presenter(answers: Vec<&str>) -> (PresentationHandle, JoinHandle<Vec<Presented>>) {
    let (handle, mut receiver) = presentation::channel(64);
    let mut answers: VecDeque<String> = answers.into_iter().map(String::from).collect();

    let task = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(message) = receiver.recv().await {
            seen.push(Presented {
                sender: message.sender.clone(),
                text: message.text.clone(),
                question: message.is_question(),
            });
            if message.is_question() {
                let answer = answers.pop_front().unwrap_or_default();
                let _ = message.respond(answer);
            }
        }
        seen
    });

    (handle, task)
}

/// Front-end that only records.
pub fn recording_presenter() -> (PresentationHandle, JoinHandle<Vec<Presented>>) {
    scripted_presenter(Vec::new())
}
