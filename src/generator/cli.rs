//! Generator backed by a headless LLM CLI.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::prompts::Characters;

use super::{Generator, Role, RoleMemory};

/// Which CLI is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CliFlavor {
    #[default]
    Claude,
    Gemini,
}

impl CliFlavor {
    fn default_binary(&self) -> &'static str {
        match self {
            CliFlavor::Claude => "claude",
            CliFlavor::Gemini => "gemini",
        }
    }
}

/// Invokes `claude` or `gemini` once per role call.
pub struct CliGenerator {
    flavor: CliFlavor,
    cli_path: String,
    model: Option<String>,
    timeout: Duration,
    characters: Characters,
}

impl CliGenerator {
    pub fn new(flavor: CliFlavor, characters: Characters) -> Self {
        Self {
            flavor,
            cli_path: flavor.default_binary().to_string(),
            model: None,
            timeout: Duration::from_secs(300),
            characters,
        }
    }

    /// Uses a custom CLI binary path.
    pub fn with_cli_path(mut self, cli_path: impl Into<String>) -> Self {
        self.cli_path = cli_path.into();
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Character prompt, prior exchanges and the new request, in that order.
    fn compose(&self, role: Role, prompt: &str, memory: &RoleMemory) -> String {
        let mut text = String::new();
        text.push_str(self.characters.get(role));
        text.push_str("\n\n");
        if !memory.is_empty() {
            text.push_str("## Conversation so far\n\n");
            text.push_str(&memory.transcript());
            text.push_str("\n\n## New request\n\n");
        }
        text.push_str(prompt);
        text
    }

    fn build_args(&self, full_prompt: String) -> Vec<String> {
        let mut args = match self.flavor {
            CliFlavor::Claude => vec![
                "--print".to_string(),
                "--output-format".to_string(),
                "text".to_string(),
            ],
            CliFlavor::Gemini => Vec::new(),
        };

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        match self.flavor {
            CliFlavor::Claude => args.push("-p".to_string()),
            CliFlavor::Gemini => args.push("--prompt".to_string()),
        }
        args.push(full_prompt);

        args
    }
}

#[async_trait]
impl Generator for CliGenerator {
    async fn produce(&self, role: Role, prompt: &str, memory: &RoleMemory) -> Result<String> {
        let args = self.build_args(self.compose(role, prompt, memory));

        tracing::info!(cli = %self.cli_path, role = %role, "invoking generator");

        let child = Command::new(&self.cli_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Generator(format!("failed to spawn {}: {}", self.cli_path, e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                tracing::error!(role = %role, timeout_secs = self.timeout.as_secs(), "generator timed out");
                return Err(Error::GeneratorTimeout(self.timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Generator(format!(
                "{} exited with {}: {}",
                self.cli_path,
                output.status,
                stderr.trim()
            )));
        }

        let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(role = %role, chars = reply.len(), "generator replied");
        Ok(reply)
    }

    fn name(&self) -> &str {
        match self.flavor {
            CliFlavor::Claude => "claude-cli",
            CliFlavor::Gemini => "gemini-cli",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Layer;

    #[test]
    fn claude_args_use_print_mode_and_text_output() {
        let generator = CliGenerator::new(CliFlavor::Claude, Characters::default())
            .with_model(Some("sonnet".to_string()));
        let args = generator.build_args("hello".to_string());

        assert_eq!(args[0], "--print");
        assert!(args.windows(2).any(|w| w == ["--output-format", "text"]));
        assert!(args.windows(2).any(|w| w == ["--model", "sonnet"]));
        assert_eq!(&args[args.len() - 2..], ["-p", "hello"]);
    }

    #[test]
    fn gemini_args_pass_prompt_flag() {
        let generator = CliGenerator::new(CliFlavor::Gemini, Characters::default());
        let args = generator.build_args("hello".to_string());

        assert_eq!(args, vec!["--prompt".to_string(), "hello".to_string()]);
        assert_eq!(generator.name(), "gemini-cli");
    }

    #[test]
    fn composed_prompt_puts_memory_before_request() {
        let generator = CliGenerator::new(CliFlavor::Claude, Characters::default());
        let mut memory = RoleMemory::new();
        memory.record("first request", "first reply");

        let role = Role::Developer(Layer::Service);
        let text = generator.compose(role, "second request", &memory);

        assert!(text.starts_with(Characters::default().get(role)));
        assert!(text.find("first reply").unwrap() < text.find("second request").unwrap());
    }

    #[tokio::test]
    async fn missing_binary_is_a_generator_error() {
        let generator = CliGenerator::new(CliFlavor::Claude, Characters::default())
            .with_cli_path("/nonexistent/agentcy-llm");

        let err = generator
            .produce(Role::Orchestrator, "hi", &RoleMemory::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generator(_)));
    }

    #[tokio::test]
    #[ignore] // Requires claude CLI to be installed and authenticated
    async fn claude_cli_answers_a_prompt() {
        let generator = CliGenerator::new(CliFlavor::Claude, Characters::default());
        let reply = generator
            .produce(Role::Orchestrator, "Reply with the word ok.", &RoleMemory::new())
            .await
            .unwrap();
        assert!(!reply.is_empty());
    }
}
