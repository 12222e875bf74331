//! Bounded produce/verify loop for one layer.
//!
//! The engine alternates a [`Phase::Producing`] step (developer role writes
//! an artifact, sandbox runs it) and a [`Phase::Verifying`] step (tester role
//! judges it) until the tester accepts or the turn budget is spent. Turn
//! `t + 1` never starts before turn `t` has a verdict.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::extract::{extract_code, parse_envelope};
use crate::generator::{Conversation, Generator, Role};
use crate::presentation::PresentationHandle;
use crate::project::Layer;
use crate::prompts::{output_format, FollowupPromptBuilder, KickoffPromptBuilder, VerifyPromptBuilder};
use crate::sandbox::Sandbox;

/// Which role acts next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Producing,
    Verifying,
}

/// How a turn's verdict came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Accepted,
    Rejected,
    /// The verifier omitted its feedback and acceptance was assumed.
    DefaultAccepted,
    /// The artifact failed to build or run; the verifier was not asked.
    ExecutionFailed,
    /// A reply could not be parsed.
    Unparseable,
}

/// The decision recorded for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub accepted: bool,
    pub feedback: String,
    pub log_excerpt: String,
    pub status: VerdictStatus,
}

impl VerificationVerdict {
    fn rejected(status: VerdictStatus, feedback: String) -> Self {
        Self {
            accepted: false,
            feedback,
            log_excerpt: String::new(),
            status,
        }
    }
}

/// One produce/verify round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: usize,
    /// None when the producer's reply had no extractable artifact.
    pub artifact: Option<String>,
    pub verdict: VerificationVerdict,
}

/// Result of driving one layer to a terminal artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutcome {
    pub layer: Layer,
    /// The accepted artifact, or the last one produced.
    pub artifact: String,
    pub history: Vec<TurnRecord>,
    pub accepted: bool,
}

impl EngineOutcome {
    pub fn turns(&self) -> usize {
        self.history.len()
    }

    pub fn default_accepts(&self) -> usize {
        self.history
            .iter()
            .filter(|r| r.verdict.status == VerdictStatus::DefaultAccepted)
            .count()
    }
}

/// Called before each producer step.
#[async_trait]
pub trait TurnHook: Send {
    async fn before_turn(&mut self, layer: Layer, turn: usize) -> Result<()>;
}

/// Engine tuning.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub max_turns: usize,
    /// Trailing log lines handed to the verifier.
    pub log_tail: usize,
    /// Pause between steady state and log capture.
    pub settle_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_turns: 5,
            log_tail: 50,
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// What a layer has to build and the context it builds against.
#[derive(Debug, Clone)]
pub struct LayerRequest {
    pub layer: Layer,
    pub requirements: String,
    /// Documentation of every upstream layer.
    pub prior_docs: String,
    /// Service-layer documentation for the presentation verifier.
    pub service_docs: Option<String>,
    /// Runtime facts for the producer.
    pub environment: Vec<String>,
    /// Overrides the sandbox's dependency list.
    pub dependencies: Option<Vec<String>>,
}

impl LayerRequest {
    pub fn new(layer: Layer, requirements: impl Into<String>) -> Self {
        Self {
            layer,
            requirements: requirements.into(),
            prior_docs: String::new(),
            service_docs: None,
            environment: Vec::new(),
            dependencies: None,
        }
    }

    pub fn with_prior_docs(mut self, docs: impl Into<String>) -> Self {
        self.prior_docs = docs.into();
        self
    }

    pub fn with_service_docs(mut self, docs: impl Into<String>) -> Self {
        self.service_docs = Some(docs.into());
        self
    }

    pub fn with_environment(mut self, notes: Vec<String>) -> Self {
        self.environment = notes;
        self
    }
}

/// Drives the produce/verify state machine.
pub struct RetryEngine<'a> {
    generator: &'a dyn Generator,
    presenter: &'a PresentationHandle,
    settings: EngineSettings,
}

impl<'a> RetryEngine<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        presenter: &'a PresentationHandle,
        settings: EngineSettings,
    ) -> Self {
        Self {
            generator,
            presenter,
            settings,
        }
    }

    /// Runs the layer to acceptance or budget exhaustion.
    ///
    /// `sandbox` is only used for layers that require execution. Budget
    /// exhaustion is not an error; the last produced artifact is returned.
    pub async fn run(
        &self,
        request: &LayerRequest,
        mut sandbox: Option<&mut dyn Sandbox>,
        mut hook: Option<&mut dyn TurnHook>,
    ) -> Result<EngineOutcome> {
        let layer = request.layer;
        let max_turns = self.settings.max_turns.max(1);

        let mut producer = Conversation::new(Role::Developer(layer));
        let mut verifier = Conversation::new(Role::Tester(layer));

        let mut history: Vec<TurnRecord> = Vec::new();
        let mut phase = Phase::Producing;
        let mut turn = 0usize;
        let mut feedback = String::new();
        let mut candidate: Option<(String, String)> = None;
        let mut last_artifact: Option<String> = None;

        tracing::info!(layer = %layer, max_turns, "starting layer");

        loop {
            match phase {
                Phase::Producing => {
                    if turn >= max_turns {
                        break;
                    }

                    if let Some(hook) = hook.as_deref_mut() {
                        hook.before_turn(layer, turn).await?;
                    }

                    let prompt = if turn == 0 {
                        KickoffPromptBuilder::new(layer, request.requirements.as_str())
                            .with_prior_docs(request.prior_docs.as_str())
                            .with_environment(request.environment.clone())
                            .build()
                    } else {
                        FollowupPromptBuilder::new(layer, feedback.as_str()).build()
                    };

                    let reply = producer.ask(self.generator, &prompt).await?;
                    self.presenter.show(producer.role(), reply.as_str()).await?;

                    let artifact = match extract_code(&reply, layer.language()) {
                        Ok(artifact) => artifact,
                        Err(e) => {
                            tracing::warn!(layer = %layer, turn, error = %e, "producer reply has no artifact");
                            feedback = format!(
                                "Your reply could not be used: {}. {}",
                                e,
                                output_format(layer.language(), true)
                            );
                            history.push(TurnRecord {
                                turn,
                                artifact: None,
                                verdict: VerificationVerdict::rejected(
                                    VerdictStatus::Unparseable,
                                    feedback.clone(),
                                ),
                            });
                            turn += 1;
                            continue;
                        }
                    };
                    last_artifact = Some(artifact.clone());

                    let logs = match sandbox.as_deref_mut() {
                        Some(sandbox) if layer.requires_execution() => {
                            match self
                                .execute(sandbox, &artifact, request.dependencies.as_deref())
                                .await
                            {
                                Ok(logs) => logs,
                                Err(e) if e.is_execution_failure() => {
                                    tracing::warn!(layer = %layer, turn, error = %e, "artifact failed to run");
                                    feedback = format!("The code failed to build or run:\n{}", e);
                                    self.presenter.show("Sandbox", feedback.as_str()).await?;
                                    history.push(TurnRecord {
                                        turn,
                                        artifact: Some(artifact),
                                        verdict: VerificationVerdict::rejected(
                                            VerdictStatus::ExecutionFailed,
                                            feedback.clone(),
                                        ),
                                    });
                                    turn += 1;
                                    continue;
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        _ => String::new(),
                    };

                    candidate = Some((artifact, logs));
                    phase = Phase::Verifying;
                }
                Phase::Verifying => {
                    phase = Phase::Producing;
                    let Some((artifact, logs)) = candidate.take() else {
                        continue;
                    };

                    let mut builder =
                        VerifyPromptBuilder::new(layer, request.requirements.as_str(), artifact.as_str())
                            .with_logs(logs.as_str());
                    if layer == Layer::Presentation {
                        if let Some(docs) = &request.service_docs {
                            builder = builder.with_service_docs(docs.as_str());
                        }
                    }

                    let reply = verifier.ask(self.generator, &builder.build()).await?;
                    self.presenter.show(verifier.role(), reply.as_str()).await?;

                    let verdict = judge(layer, turn, &reply, logs);
                    let accepted = verdict.accepted;
                    feedback = verdict.feedback.clone();
                    history.push(TurnRecord {
                        turn,
                        artifact: Some(artifact.clone()),
                        verdict,
                    });

                    if accepted {
                        tracing::info!(layer = %layer, turns = history.len(), "layer accepted");
                        return Ok(EngineOutcome {
                            layer,
                            artifact,
                            history,
                            accepted: true,
                        });
                    }
                    turn += 1;
                }
            }
        }

        let artifact = last_artifact.ok_or_else(|| {
            Error::Extraction(format!(
                "no {} artifact in {} turns",
                layer.language(),
                max_turns
            ))
        })?;

        tracing::warn!(layer = %layer, turns = history.len(), "turn budget exhausted without acceptance");
        Ok(EngineOutcome {
            layer,
            artifact,
            history,
            accepted: false,
        })
    }

    /// Runs the artifact and returns the logs it produced.
    async fn execute(
        &self,
        sandbox: &mut dyn Sandbox,
        artifact: &str,
        dependencies: Option<&[String]>,
    ) -> Result<String> {
        let since = Utc::now();
        sandbox.execute(artifact, dependencies).await?;

        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        match sandbox.recent_logs(since, self.settings.log_tail).await {
            Ok(logs) => Ok(logs),
            Err(e) => {
                tracing::warn!(container = %sandbox.identity().container_name, error = %e, "could not fetch logs");
                Ok(String::new())
            }
        }
    }
}

fn judge(layer: Layer, turn: usize, reply: &str, logs: String) -> VerificationVerdict {
    match parse_envelope(reply) {
        Ok(envelope) if envelope.defaulted => {
            tracing::warn!(
                event = "verdict_default_accept",
                layer = %layer,
                turn,
                "verifier omitted feedback, accepting by default"
            );
            VerificationVerdict {
                accepted: true,
                feedback: envelope.feedback,
                log_excerpt: logs,
                status: VerdictStatus::DefaultAccepted,
            }
        }
        Ok(envelope) => VerificationVerdict {
            status: if envelope.accepted {
                VerdictStatus::Accepted
            } else {
                VerdictStatus::Rejected
            },
            accepted: envelope.accepted,
            feedback: envelope.feedback,
            log_excerpt: logs,
        },
        Err(e) => {
            tracing::warn!(layer = %layer, turn, error = %e, "verifier reply is not an envelope");
            VerificationVerdict {
                accepted: false,
                feedback: reply.trim().to_string(),
                log_excerpt: logs,
                status: VerdictStatus::Unparseable,
            }
        }
    }
}
