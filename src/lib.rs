//! Agentcy - sandboxed generate-run-verify pipeline for layered web applications
//!
//! This library drives LLM roles through a bounded produce/verify loop per
//! application layer (database, backend, frontend), executing every candidate
//! artifact in a fresh container before it is judged.

pub mod backoff;
pub mod config;
pub mod container;
pub mod dockerfile;
pub mod engine;
pub mod error;
pub mod extract;
pub mod generator;
pub mod metrics;
pub mod pipeline;
pub mod presentation;
pub mod project;
pub mod prompts;
pub mod requirements;
pub mod sandbox;
pub mod testing;
pub mod usecase;

pub use error::{Error, Result};

pub use config::{PipelineConfig, Validate, ValidationResult};
pub use container::{
    ContainerHandle, ContainerLifecycleManager, ContainerRuntime, ContainerStatus, DockerRuntime,
    PollPolicy,
};
pub use dockerfile::{Recipe, SandboxKind};
pub use engine::{
    EngineOutcome, EngineSettings, LayerRequest, Phase, RetryEngine, TurnHook, TurnRecord,
    VerdictStatus, VerificationVerdict,
};
pub use generator::{CliFlavor, CliGenerator, Conversation, Generator, Role, RoleMemory};
pub use metrics::{save_evaluation, LayerTurns, PipelineMetrics};
pub use pipeline::{restart, PipelineController, PipelineRun, RestartedProject};
pub use presentation::{ConsolePresenter, PresentationHandle, PresentationMessage};
pub use project::{Layer, ProjectContext, SandboxIdentity};
pub use requirements::{LayerTasks, Requirements, RequirementsInterview};
pub use sandbox::{ContentSandbox, DatabaseCredentials, DatabaseSandbox, Sandbox, SandboxState, ServiceSandbox};
pub use usecase::UseCase;
