//! Text generation boundary.
//!
//! A [`Generator`] turns a prompt plus a role's conversation memory into a
//! single text reply. The pipeline never inspects how that happens.

mod cli;

pub use cli::{CliFlavor, CliGenerator};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::project::Layer;

/// Who is speaking in a generator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "role", content = "layer")]
pub enum Role {
    /// Gathers requirements and splits them into per-layer tasks.
    Orchestrator,
    /// Produces a layer's artifact.
    Developer(Layer),
    /// Verifies a layer's artifact.
    Tester(Layer),
    /// Documents a layer's accepted artifact.
    Documenter(Layer),
}

impl Role {
    /// Stable key used for character prompt files, e.g. `backend_dev`.
    pub fn key(&self) -> String {
        match self {
            Role::Orchestrator => "orchestrator".to_string(),
            Role::Developer(layer) => format!("{}_dev", layer.dir_name()),
            Role::Tester(layer) => format!("{}_test", layer.dir_name()),
            Role::Documenter(layer) => format!("{}_doc", layer.dir_name()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Orchestrator => write!(f, "Orchestrator"),
            Role::Developer(layer) => write!(f, "{} developer", capitalize(layer.dir_name())),
            Role::Tester(layer) => write!(f, "{} tester", capitalize(layer.dir_name())),
            Role::Documenter(layer) => write!(f, "{} documenter", capitalize(layer.dir_name())),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One side of a remembered exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// Text sent to the role.
    Prompt,
    /// Text the role produced.
    Reply,
}

/// Append-only conversation memory of one role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleMemory {
    entries: Vec<(Speaker, String)>,
}

impl RoleMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a prompt and the reply it produced.
    pub fn record(&mut self, prompt: impl Into<String>, reply: impl Into<String>) {
        self.entries.push((Speaker::Prompt, prompt.into()));
        self.entries.push((Speaker::Reply, reply.into()));
    }

    pub fn entries(&self) -> &[(Speaker, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Flattens the memory into a plain-text transcript.
    pub fn transcript(&self) -> String {
        self.entries
            .iter()
            .map(|(speaker, text)| match speaker {
                Speaker::Prompt => format!("### Request\n{}", text),
                Speaker::Reply => format!("### Your previous reply\n{}", text),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Produces text for a role.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the role's reply to `prompt` given its prior exchanges.
    async fn produce(&self, role: Role, prompt: &str, memory: &RoleMemory) -> Result<String>;

    /// Returns the name of this generator.
    fn name(&self) -> &str;
}

/// A role bound to its own memory.
#[derive(Debug, Clone)]
pub struct Conversation {
    role: Role,
    memory: RoleMemory,
}

impl Conversation {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            memory: RoleMemory::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Asks the role and remembers the exchange.
    pub async fn ask(&mut self, generator: &dyn Generator, prompt: &str) -> Result<String> {
        let reply = generator.produce(self.role, prompt, &self.memory).await?;
        self.memory.record(prompt, reply.clone());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_keys_name_layer_and_duty() {
        assert_eq!(Role::Developer(Layer::Service).key(), "backend_dev");
        assert_eq!(Role::Tester(Layer::Presentation).key(), "frontend_test");
        assert_eq!(Role::Documenter(Layer::Data).key(), "database_doc");
        assert_eq!(Role::Orchestrator.key(), "orchestrator");
    }

    #[test]
    fn role_display_is_human_readable() {
        assert_eq!(Role::Developer(Layer::Service).to_string(), "Backend developer");
        assert_eq!(Role::Orchestrator.to_string(), "Orchestrator");
    }

    #[test]
    fn memory_is_append_only_and_flattens_in_order() {
        let mut memory = RoleMemory::new();
        memory.record("write a schema", "```sql\nCREATE TABLE a();\n```");
        memory.record("add an index", "```sql\nCREATE INDEX i ON a(x);\n```");

        assert_eq!(memory.len(), 4);
        assert_eq!(memory.entries()[0].0, Speaker::Prompt);
        assert_eq!(memory.entries()[1].0, Speaker::Reply);

        let transcript = memory.transcript();
        let first = transcript.find("write a schema").unwrap();
        let second = transcript.find("add an index").unwrap();
        assert!(first < second);
    }
}
