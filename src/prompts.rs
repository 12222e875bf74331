//! Prompt builders and role character prompts.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::generator::Role;
use crate::project::Layer;

/// Instruction appended to every artifact-producing prompt.
pub fn output_format(language: &str, code_only: bool) -> String {
    let mut text = format!(
        "The output should be a markdown code snippet, starting with \"```{}\" and ending with \"```\".",
        language
    );
    if code_only {
        text.push_str(" Only output this markdown code snippet. Do not output any additional comments.");
    }
    text
}

fn layer_title(layer: Layer) -> &'static str {
    match layer {
        Layer::Data => "Database",
        Layer::Service => "Backend",
        Layer::Presentation => "Frontend",
    }
}

/// Builder for the first producer prompt of a layer.
pub struct KickoffPromptBuilder {
    layer: Layer,
    requirements: String,
    prior_docs: Option<String>,
    environment: Vec<String>,
}

impl KickoffPromptBuilder {
    pub fn new(layer: Layer, requirements: impl Into<String>) -> Self {
        Self {
            layer,
            requirements: requirements.into(),
            prior_docs: None,
            environment: Vec::new(),
        }
    }

    /// Documentation produced by upstream layers.
    pub fn with_prior_docs(mut self, docs: impl Into<String>) -> Self {
        let docs = docs.into();
        if !docs.trim().is_empty() {
            self.prior_docs = Some(docs);
        }
        self
    }

    /// Runtime facts the artifact must respect (addresses, ports).
    pub fn with_environment(mut self, notes: Vec<String>) -> Self {
        self.environment = notes;
        self
    }

    pub fn build(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "## {} Development Request\n\n",
            layer_title(self.layer)
        ));
        prompt.push_str(&format!(
            "Write the complete {} for the application in a single {} file.\n\n",
            self.layer.dir_name(),
            self.layer.language()
        ));

        prompt.push_str("### Requirements\n\n");
        prompt.push_str(&self.requirements);
        prompt.push_str("\n\n");

        if let Some(docs) = &self.prior_docs {
            prompt.push_str("### Documentation of Existing Layers\n\n");
            prompt.push_str(docs);
            prompt.push_str("\n\n");
        }

        if !self.environment.is_empty() {
            prompt.push_str("### Runtime Environment\n\n");
            for note in &self.environment {
                prompt.push_str(&format!("- {}\n", note));
            }
            prompt.push('\n');
        }

        prompt.push_str("### Output Format\n\n");
        prompt.push_str(&output_format(self.layer.language(), true));
        prompt.push('\n');

        prompt
    }
}

/// Builder for producer prompts after a rejected turn.
pub struct FollowupPromptBuilder {
    layer: Layer,
    feedback: String,
}

impl FollowupPromptBuilder {
    pub fn new(layer: Layer, feedback: impl Into<String>) -> Self {
        Self {
            layer,
            feedback: feedback.into(),
        }
    }

    pub fn build(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Revision Request\n\n");
        prompt.push_str(&format!(
            "Your last {} was not accepted. Rewrite the whole file so that it addresses the feedback below.\n\n",
            self.layer.dir_name()
        ));

        prompt.push_str("### Feedback\n\n");
        prompt.push_str(&self.feedback);
        prompt.push_str("\n\n");

        prompt.push_str("### Output Format\n\n");
        prompt.push_str(&output_format(self.layer.language(), true));
        prompt.push('\n');

        prompt
    }
}

/// Builder for verifier prompts.
pub struct VerifyPromptBuilder {
    layer: Layer,
    requirements: String,
    artifact: String,
    logs: String,
    service_docs: Option<String>,
}

impl VerifyPromptBuilder {
    pub fn new(layer: Layer, requirements: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            layer,
            requirements: requirements.into(),
            artifact: artifact.into(),
            logs: String::new(),
            service_docs: None,
        }
    }

    /// Container output captured while the artifact ran.
    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = logs.into();
        self
    }

    /// Documentation of the service layer's endpoints.
    pub fn with_service_docs(mut self, docs: impl Into<String>) -> Self {
        self.service_docs = Some(docs.into());
        self
    }

    pub fn build(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "## {} Verification Request\n\n",
            layer_title(self.layer)
        ));
        prompt.push_str("Check whether the code below fulfils the requirements.\n\n");

        prompt.push_str("### Requirements\n\n");
        prompt.push_str(&self.requirements);
        prompt.push_str("\n\n");

        prompt.push_str("### Code\n\n");
        prompt.push_str(&format!("```{}\n", self.layer.language()));
        prompt.push_str(&self.artifact);
        prompt.push_str("\n```\n\n");

        if self.layer.requires_execution() {
            prompt.push_str("### Container Logs\n\n");
            if self.logs.trim().is_empty() {
                prompt.push_str("(no output)\n\n");
            } else {
                prompt.push_str("```\n");
                prompt.push_str(&self.logs);
                prompt.push_str("\n```\n\n");
            }
        }

        if let Some(docs) = &self.service_docs {
            prompt.push_str("### Backend Documentation\n\n");
            prompt.push_str(docs);
            prompt.push_str("\n\n");
            prompt.push_str(
                "Every endpoint documented above must have a corresponding element in the page.\n\n",
            );
        }

        prompt.push_str("### Response Format\n\n");
        prompt.push_str("Respond with a JSON object:\n");
        prompt.push_str("```json\n");
        prompt.push_str("{\n");
        prompt.push_str("  \"accepted\": true,\n");
        prompt.push_str("  \"feedback\": \"What must change, or why it is accepted\"\n");
        prompt.push_str("}\n");
        prompt.push_str("```\n");

        prompt
    }
}

/// Builder for documentation requests.
pub struct DocumentationPromptBuilder {
    layer: Layer,
    artifact: String,
}

impl DocumentationPromptBuilder {
    pub fn new(layer: Layer, artifact: impl Into<String>) -> Self {
        Self {
            layer,
            artifact: artifact.into(),
        }
    }

    pub fn build(&self) -> String {
        let focus = match self.layer {
            Layer::Data => "every table, its columns, types and constraints",
            Layer::Service => "every endpoint with its method, path, request body and response",
            Layer::Presentation => "every page element that calls the backend",
        };

        let mut prompt = String::new();
        prompt.push_str(&format!(
            "## {} Documentation Request\n\n",
            layer_title(self.layer)
        ));
        prompt.push_str(&format!(
            "Document {} so that the next developer can build on it.\n\n",
            focus
        ));
        prompt.push_str("### Code\n\n");
        prompt.push_str(&format!("```{}\n", self.layer.language()));
        prompt.push_str(&self.artifact);
        prompt.push_str("\n```\n\n");
        prompt.push_str("### Output Format\n\n");
        prompt.push_str("Plain markdown, no code block around the whole answer.\n");
        prompt
    }
}

/// Opening message of the requirements interview.
pub fn requirements_kickoff(description: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("## Requirements Interview\n\n");
    prompt.push_str("A user wants the following web application:\n\n");
    prompt.push_str(description);
    prompt.push_str("\n\n");
    prompt.push_str("Ask one clarifying question at a time until the requirements are complete.\n\n");
    prompt.push_str("### Response Format\n\n");
    prompt.push_str("```json\n");
    prompt.push_str("{\n");
    prompt.push_str("  \"accepted\": false,\n");
    prompt.push_str("  \"text\": \"Your question, or the final requirements summary when accepted is true\"\n");
    prompt.push_str("}\n");
    prompt.push_str("```\n");
    prompt
}

/// Request for the per-layer task split.
pub fn task_split() -> String {
    let mut prompt = String::new();
    prompt.push_str("## Task Split Request\n\n");
    prompt.push_str("Split the agreed requirements into one task per layer.\n\n");
    prompt.push_str("### Output Format\n\n");
    prompt.push_str("```json\n");
    prompt.push_str("{\n");
    prompt.push_str("  \"database\": \"Task for the database developer\",\n");
    prompt.push_str("  \"backend\": \"Task for the backend developer\",\n");
    prompt.push_str("  \"frontend\": \"Task for the frontend developer\"\n");
    prompt.push_str("}\n");
    prompt.push_str("```\n");
    prompt
}

/// System prompts that give each role its character.
#[derive(Debug, Clone)]
pub struct Characters {
    overrides: HashMap<String, String>,
    defaults: HashMap<String, String>,
}

impl Default for Characters {
    fn default() -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(
            Role::Orchestrator.key(),
            "You are a product owner. You turn a vague idea into precise requirements \
             for a small web application with a PostgreSQL database, a Python backend \
             and a single HTML page."
                .to_string(),
        );
        for layer in Layer::ALL {
            let (dev, test, doc) = match layer {
                Layer::Data => (
                    "You are a database developer. You write PostgreSQL schemas.",
                    "You are a database reviewer. You check schemas against requirements.",
                    "You are a technical writer documenting database schemas.",
                ),
                Layer::Service => (
                    "You are a backend developer. You write FastAPI services in one file \
                     that connect to PostgreSQL with asyncpg and run with uvicorn.",
                    "You are a backend tester. You judge a service by its code and its \
                     container logs.",
                    "You are a technical writer documenting HTTP APIs.",
                ),
                Layer::Presentation => (
                    "You are a frontend developer. You write a single self-contained HTML \
                     page with inline JavaScript that calls the backend.",
                    "You are a frontend tester. You check that the page covers every backend \
                     endpoint.",
                    "You are a technical writer documenting user interfaces.",
                ),
            };
            defaults.insert(Role::Developer(layer).key(), dev.to_string());
            defaults.insert(Role::Tester(layer).key(), test.to_string());
            defaults.insert(Role::Documenter(layer).key(), doc.to_string());
        }

        Self {
            overrides: HashMap::new(),
            defaults,
        }
    }
}

impl Characters {
    /// Loads `<dir>/<role key>.txt` overrides on top of the built-in characters.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut characters = Self::default();
        let Some(dir) = dir else {
            return Ok(characters);
        };

        let keys: Vec<String> = characters.defaults.keys().cloned().collect();
        for key in keys {
            let path = dir.join(format!("{}.txt", key));
            if path.exists() {
                let text = std::fs::read_to_string(&path)?;
                tracing::debug!(role = %key, path = ?path, "loaded character override");
                characters.overrides.insert(key, text);
            }
        }
        Ok(characters)
    }

    /// Character prompt for a role.
    pub fn get(&self, role: Role) -> &str {
        let key = role.key();
        self.overrides
            .get(&key)
            .or_else(|| self.defaults.get(&key))
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn kickoff_prompt_carries_requirements_docs_and_format() {
        let prompt = KickoffPromptBuilder::new(Layer::Service, "Store poll votes")
            .with_prior_docs("Table poll(id, question)")
            .with_environment(vec!["Listen on port 8000".to_string()])
            .build();

        assert!(prompt.contains("## Backend Development Request"));
        assert!(prompt.contains("Store poll votes"));
        assert!(prompt.contains("Table poll(id, question)"));
        assert!(prompt.contains("- Listen on port 8000"));
        assert!(prompt.contains("starting with \"```python\""));
    }

    #[test]
    fn kickoff_prompt_omits_empty_docs_section() {
        let prompt = KickoffPromptBuilder::new(Layer::Data, "Polls")
            .with_prior_docs("  ")
            .build();
        assert!(!prompt.contains("Documentation of Existing Layers"));
    }

    #[test]
    fn followup_prompt_carries_feedback() {
        let prompt = FollowupPromptBuilder::new(Layer::Presentation, "Vote button missing").build();

        assert!(prompt.contains("## Revision Request"));
        assert!(prompt.contains("Vote button missing"));
        assert!(prompt.contains("```html"));
    }

    #[test]
    fn verify_prompt_skips_logs_for_data_layer() {
        let prompt = VerifyPromptBuilder::new(Layer::Data, "Polls", "CREATE TABLE poll();").build();

        assert!(!prompt.contains("Container Logs"));
        assert!(prompt.contains("\"accepted\": true"));
    }

    #[test]
    fn verify_prompt_includes_logs_and_service_docs() {
        let prompt = VerifyPromptBuilder::new(Layer::Presentation, "Polls", "<html></html>")
            .with_logs("GET / 200")
            .with_service_docs("POST /votes records a vote")
            .build();

        assert!(prompt.contains("GET / 200"));
        assert!(prompt.contains("POST /votes records a vote"));
    }

    #[test]
    fn output_format_can_force_code_only() {
        assert!(!output_format("sql", false).contains("Only output"));
        assert!(output_format("sql", true).contains("Only output"));
    }

    #[test]
    fn characters_cover_every_role() {
        let characters = Characters::default();
        assert!(!characters.get(Role::Orchestrator).is_empty());
        for layer in Layer::ALL {
            assert!(!characters.get(Role::Developer(layer)).is_empty());
            assert!(!characters.get(Role::Tester(layer)).is_empty());
            assert!(!characters.get(Role::Documenter(layer)).is_empty());
        }
    }

    #[test]
    fn character_files_override_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("backend_dev.txt"), "You write Flask apps.").unwrap();

        let characters = Characters::load(Some(dir.path())).unwrap();

        assert_eq!(
            characters.get(Role::Developer(Layer::Service)),
            "You write Flask apps."
        );
        assert_eq!(
            characters.get(Role::Tester(Layer::Service)),
            Characters::default().get(Role::Tester(Layer::Service))
        );
    }
}
