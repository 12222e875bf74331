//! Use-case fixtures that skip the requirements interview.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::requirements::{LayerTasks, Requirements};

/// A prepared application description with its task split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UseCase {
    /// Project name; becomes the title prefix.
    pub name: String,

    /// Agreed requirements.
    pub description: String,

    /// Per-layer tasks.
    pub tasks: LayerTasks,
}

impl UseCase {
    /// Loads a use case from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn requirements(&self) -> Requirements {
        Requirements {
            summary: self.description.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::project::Layer;
    use tempfile::TempDir;

    const QUICKPOLL: &str = r#"
name: QuickPoll
description: "Create polls and vote on them"
tasks:
  database: "Tables for polls, options and votes"
  backend: "Endpoints to create polls, vote and read results"
  frontend: "One page to create a poll and vote"
"#;

    #[test]
    fn use_case_parses_yaml() {
        let use_case: UseCase = serde_yaml::from_str(QUICKPOLL).unwrap();

        assert_eq!(use_case.name, "QuickPoll");
        assert_eq!(
            use_case.tasks.for_layer(Layer::Presentation),
            "One page to create a poll and vote"
        );
        assert_eq!(use_case.requirements().summary, "Create polls and vote on them");
    }

    #[test]
    fn use_case_loads_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quickpoll.yaml");
        std::fs::write(&path, QUICKPOLL).unwrap();

        let use_case = UseCase::load(&path).unwrap();
        assert_eq!(use_case.tasks.database, "Tables for polls, options and votes");
    }

    #[test]
    fn use_case_without_tasks_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "name: Broken\ndescription: nothing\n").unwrap();

        assert!(matches!(UseCase::load(&path), Err(Error::Yaml(_))));
    }
}
