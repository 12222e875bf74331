//! Requirements interview and per-layer task split.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::extract::{extract_json, parse_envelope};
use crate::generator::{Conversation, Generator, Role};
use crate::presentation::PresentationHandle;
use crate::project::Layer;
use crate::prompts;

/// One task description per layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerTasks {
    pub database: String,
    pub backend: String,
    pub frontend: String,
}

impl LayerTasks {
    pub fn for_layer(&self, layer: Layer) -> &str {
        match layer {
            Layer::Data => &self.database,
            Layer::Service => &self.backend,
            Layer::Presentation => &self.frontend,
        }
    }
}

/// Agreed requirements and the task split derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub summary: String,
    pub tasks: LayerTasks,
}

/// Drives the orchestrator role through the interview.
///
/// This is the only place the pipeline waits on the front-end.
pub struct RequirementsInterview<'a> {
    generator: &'a dyn Generator,
    presenter: &'a PresentationHandle,
    max_rounds: usize,
}

impl<'a> RequirementsInterview<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        presenter: &'a PresentationHandle,
        max_rounds: usize,
    ) -> Self {
        Self {
            generator,
            presenter,
            max_rounds: max_rounds.max(1),
        }
    }

    /// Interviews the user, then asks for the task split.
    pub async fn gather(&self, description: &str) -> Result<Requirements> {
        let mut orchestrator = Conversation::new(Role::Orchestrator);
        let summary = self.interview(&mut orchestrator, description).await?;
        let tasks = self.split(&mut orchestrator).await?;
        Ok(Requirements { summary, tasks })
    }

    /// Asks clarifying questions until the orchestrator accepts.
    pub async fn interview(&self, orchestrator: &mut Conversation, description: &str) -> Result<String> {
        let mut prompt = prompts::requirements_kickoff(description);
        let mut clarifications: Vec<(String, String)> = Vec::new();

        for round in 0..self.max_rounds {
            let reply = orchestrator.ask(self.generator, &prompt).await?;
            let envelope = parse_envelope(&reply)?;

            if envelope.accepted {
                if envelope.defaulted {
                    tracing::warn!(
                        event = "verdict_default_accept",
                        round,
                        "orchestrator accepted without a summary"
                    );
                    let summary = fallback_summary(description, &clarifications);
                    self.presenter.show(Role::Orchestrator, summary.as_str()).await?;
                    return Ok(summary);
                }
                self.presenter
                    .show(Role::Orchestrator, envelope.feedback.as_str())
                    .await?;
                tracing::info!(rounds = round + 1, "requirements agreed");
                return Ok(envelope.feedback);
            }

            let answer = self
                .presenter
                .ask(Role::Orchestrator, envelope.feedback.as_str())
                .await?;
            clarifications.push((envelope.feedback, answer.clone()));
            prompt = answer;
        }

        tracing::warn!(max_rounds = self.max_rounds, "interview ended without agreement");
        let summary = fallback_summary(description, &clarifications);
        self.presenter.show(Role::Orchestrator, summary.as_str()).await?;
        Ok(summary)
    }

    /// Asks the orchestrator for one task per layer.
    pub async fn split(&self, orchestrator: &mut Conversation) -> Result<LayerTasks> {
        let reply = orchestrator
            .ask(self.generator, &prompts::task_split())
            .await?;
        let tasks: LayerTasks = extract_json(&reply)?;

        for layer in Layer::ALL {
            self.presenter
                .show(
                    Role::Orchestrator,
                    format!("@{}: {}", Role::Developer(layer), tasks.for_layer(layer)),
                )
                .await?;
        }
        Ok(tasks)
    }
}

fn fallback_summary(description: &str, clarifications: &[(String, String)]) -> String {
    let mut summary = description.to_string();
    if !clarifications.is_empty() {
        summary.push_str("\n\nClarifications:\n");
        for (question, answer) in clarifications {
            summary.push_str(&format!("- Q: {}\n  A: {}\n", question, answer));
        }
    }
    summary
}
