//! Error types for the agentcy pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for sandbox and pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The container runtime rejected an operation.
    #[error("container runtime failed to {op}: {message}")]
    Runtime { op: &'static str, message: String },

    /// The named container, image or network does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The named resource already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A container never left the transient "created" state.
    #[error("container {container} did not reach a steady state within {secs} seconds")]
    SteadyStateTimeout { container: String, secs: u64 },

    /// A generator response did not contain the expected code block or envelope.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The generator could not be invoked or returned an error.
    #[error("generator failed: {0}")]
    Generator(String),

    /// The generator did not answer before its deadline.
    #[error("generator timed out after {0} seconds")]
    GeneratorTimeout(u64),

    /// The presentation channel was closed before a reply arrived.
    #[error("presentation channel closed: {0}")]
    Presentation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A project directory is missing or malformed.
    #[error("invalid project directory: {0}")]
    InvalidProject(PathBuf),

    /// IO error during workspace operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML fixture parsing failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML config parsing failed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Builds a tagged runtime error from any displayable cause.
    pub fn runtime(op: &'static str, cause: impl std::fmt::Display) -> Self {
        Error::Runtime {
            op,
            message: cause.to_string(),
        }
    }

    /// Returns true for the "resource is absent" class of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true for the "resource already exists" class of errors.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    /// Errors raised while building or running an artifact's container.
    ///
    /// These reject the current turn instead of aborting the layer.
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Error::Runtime { .. }
                | Error::NotFound(_)
                | Error::AlreadyExists(_)
                | Error::SteadyStateTimeout { .. }
        )
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
