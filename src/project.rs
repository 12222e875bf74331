//! Project context shared by every pipeline component.
//!
//! A [`ProjectContext`] is created once per pipeline run and handed to each
//! component constructor. Container names and image tags are derived from the
//! project title so that concurrent projects never collide on the runtime.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One independently generated and verified slice of the target application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Relational schema. Never executed per turn.
    Data,
    /// Interpreted web service.
    Service,
    /// Static markup served by a web server.
    Presentation,
}

impl Layer {
    /// All layers in dependency order.
    pub const ALL: [Layer; 3] = [Layer::Data, Layer::Service, Layer::Presentation];

    /// Workspace subdirectory and metrics key for this layer.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Layer::Data => "database",
            Layer::Service => "backend",
            Layer::Presentation => "frontend",
        }
    }

    /// Fenced-block language tag used when extracting this layer's artifact.
    pub fn language(&self) -> &'static str {
        match self {
            Layer::Data => "sql",
            Layer::Service => "python",
            Layer::Presentation => "html",
        }
    }

    /// File name of the single current artifact in the layer workspace.
    pub fn artifact_file(&self) -> &'static str {
        match self {
            Layer::Data => "schema.sql",
            Layer::Service => "index.py",
            Layer::Presentation => "index.html",
        }
    }

    /// Whether each turn's artifact is executed in a sandbox before verification.
    pub fn requires_execution(&self) -> bool {
        !matches!(self, Layer::Data)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Runtime identity of one layer's sandbox within one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxIdentity {
    pub project: String,
    pub layer: Layer,
    pub container_name: String,
    pub image_tag: String,
    pub port: u16,
}

/// Explicit per-run project state.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    title: String,
    root: PathBuf,
    network: String,
    run_id: String,
}

impl ProjectContext {
    /// Creates a fresh project named `name` with a random four-letter suffix.
    pub fn new(name: &str, projects_dir: impl AsRef<Path>, network: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4();
        let suffix: String = id.as_bytes()[..4]
            .iter()
            .map(|b| (b'a' + b % 26) as char)
            .collect();
        let title = format!("{}_{}", sanitize_title(name), suffix);

        Self {
            root: projects_dir.as_ref().join(&title),
            title,
            network: network.into(),
            run_id: id.to_string(),
        }
    }

    /// Opens an existing project directory.
    pub fn existing(
        title: &str,
        projects_dir: impl AsRef<Path>,
        network: impl Into<String>,
    ) -> Result<Self> {
        let root = projects_dir.as_ref().join(title);
        if !root.is_dir() {
            return Err(Error::InvalidProject(root));
        }

        Ok(Self {
            title: title.to_string(),
            root,
            network: network.into(),
            run_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Workspace directory for a layer.
    pub fn workspace(&self, layer: Layer) -> PathBuf {
        self.root.join(layer.dir_name())
    }

    /// Directory holding per-layer documentation.
    pub fn docs_dir(&self) -> PathBuf {
        self.root.join("docs")
    }

    /// Location of the persisted run metrics.
    pub fn metrics_path(&self) -> PathBuf {
        self.root.join("metrics.json")
    }

    /// Deterministic sandbox identity for a layer, reused across retries.
    pub fn identity(&self, layer: Layer, port: u16) -> SandboxIdentity {
        let slug = runtime_slug(&self.title);
        SandboxIdentity {
            project: self.title.clone(),
            layer,
            container_name: format!("{}-{}", slug, layer.dir_name()),
            image_tag: format!("{}-{}:latest", slug, layer.dir_name()),
            port,
        }
    }
}

/// Keeps alphanumerics, `_` and `-`; collapses everything else.
fn sanitize_title(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        "Webapp".to_string()
    } else {
        cleaned
    }
}

/// Image references must be lowercase.
fn runtime_slug(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn new_project_title_carries_random_suffix() {
        let ctx = ProjectContext::new("PawsClaws", "/tmp/projects", "Agentcy");

        let (name, suffix) = ctx.title().split_once('_').unwrap();
        assert_eq!(name, "PawsClaws");
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
        assert_eq!(ctx.root(), Path::new("/tmp/projects").join(ctx.title()));
    }

    #[test]
    fn empty_name_falls_back_to_webapp() {
        let ctx = ProjectContext::new("  !! ", "/tmp", "Agentcy");
        assert!(ctx.title().starts_with("Webapp_"));
    }

    #[test]
    fn identity_is_deterministic_and_project_scoped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("QuickPoll_ahjr")).unwrap();
        let ctx = ProjectContext::existing("QuickPoll_ahjr", dir.path(), "Agentcy").unwrap();

        let first = ctx.identity(Layer::Service, 8000);
        let second = ctx.identity(Layer::Service, 8000);

        assert_eq!(first, second);
        assert_eq!(first.container_name, "quickpoll_ahjr-backend");
        assert_eq!(first.image_tag, "quickpoll_ahjr-backend:latest");
        assert_ne!(
            first.container_name,
            ctx.identity(Layer::Presentation, 80).container_name
        );
    }

    #[test]
    fn existing_rejects_missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = ProjectContext::existing("Nope_abcd", dir.path(), "Agentcy").unwrap_err();
        assert!(matches!(err, Error::InvalidProject(_)));
    }

    #[test]
    fn only_the_data_layer_skips_execution() {
        assert!(!Layer::Data.requires_execution());
        assert!(Layer::Service.requires_execution());
        assert!(Layer::Presentation.requires_execution());
        assert_eq!(
            Layer::ALL,
            [Layer::Data, Layer::Service, Layer::Presentation]
        );
    }

    #[test]
    fn layer_serializes_to_lowercase() {
        assert_eq!(serde_json::to_string(&Layer::Service).unwrap(), "\"service\"");
    }
}
