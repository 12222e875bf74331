//! Pipeline configuration and validation.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::container::PollPolicy;
use crate::engine::EngineSettings;
use crate::error::{Error, Result};
use crate::generator::CliFlavor;
use crate::project::Layer;
use crate::sandbox::DatabaseCredentials;

/// Turn budgets above this are almost always a misconfiguration.
const MAX_SENSIBLE_TURNS: usize = 10;

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}

/// Turn budget per layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnsConfig {
    #[serde(default = "default_data_turns")]
    pub data: usize,
    #[serde(default = "default_service_turns")]
    pub service: usize,
    #[serde(default = "default_presentation_turns")]
    pub presentation: usize,
}

fn default_data_turns() -> usize {
    5
}

fn default_service_turns() -> usize {
    7
}

fn default_presentation_turns() -> usize {
    5
}

impl Default for TurnsConfig {
    fn default() -> Self {
        Self {
            data: default_data_turns(),
            service: default_service_turns(),
            presentation: default_presentation_turns(),
        }
    }
}

impl TurnsConfig {
    pub fn for_layer(&self, layer: Layer) -> usize {
        match layer {
            Layer::Data => self.data,
            Layer::Service => self.service,
            Layer::Presentation => self.presentation,
        }
    }
}

impl Validate for TurnsConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        for layer in Layer::ALL {
            let turns = self.for_layer(layer);
            if turns == 0 {
                result.add_error(format!("turns.{} must be at least 1", layer));
            } else if turns > MAX_SENSIBLE_TURNS {
                result.add_warning(format!(
                    "turns.{} = {} is unusually high (> {})",
                    layer, turns, MAX_SENSIBLE_TURNS
                ));
            }
        }
        result
    }
}

/// Container runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_network_name")]
    pub network_name: String,
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    #[serde(default = "default_poll_ms")]
    pub poll_initial_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_max_ms: u64,
    #[serde(default = "default_steady_state_timeout")]
    pub steady_state_timeout_secs: u64,
    /// Trailing log lines handed to verifiers.
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

fn default_network_name() -> String {
    "Agentcy".to_string()
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("projects")
}

fn default_poll_ms() -> u64 {
    1000
}

fn default_steady_state_timeout() -> u64 {
    120
}

fn default_log_tail() -> usize {
    50
}

fn default_settle_delay() -> u64 {
    2000
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            network_name: default_network_name(),
            projects_dir: default_projects_dir(),
            poll_initial_ms: default_poll_ms(),
            poll_max_ms: default_poll_ms(),
            steady_state_timeout_secs: default_steady_state_timeout(),
            log_tail: default_log_tail(),
            settle_delay_ms: default_settle_delay(),
        }
    }
}

impl ContainerConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial: Duration::from_millis(self.poll_initial_ms),
            max: Duration::from_millis(self.poll_max_ms),
            timeout: Duration::from_secs(self.steady_state_timeout_secs),
        }
    }
}

impl Validate for ContainerConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.network_name.trim().is_empty() {
            result.add_error("container.network_name cannot be empty");
        }
        if self.poll_initial_ms == 0 {
            result.add_error("container.poll_initial_ms must be greater than 0");
        }
        if self.steady_state_timeout_secs == 0 {
            result.add_error("container.steady_state_timeout_secs must be greater than 0");
        }
        if self.poll_max_ms < self.poll_initial_ms {
            result.add_warning("container.poll_max_ms is below poll_initial_ms and will be raised");
        }
        if self.log_tail == 0 {
            result.add_warning("container.log_tail = 0 hides all container output from verifiers");
        }

        result
    }
}

/// Service-layer sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_port")]
    pub port: u16,
    /// Installed into every service image; inferred from imports when empty.
    #[serde(default = "default_service_dependencies")]
    pub dependencies: Vec<String>,
}

fn default_service_port() -> u16 {
    crate::dockerfile::DEFAULT_SERVICE_PORT
}

fn default_service_dependencies() -> Vec<String> {
    ["FastAPI", "uvicorn", "asyncpg", "pydantic"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_service_port(),
            dependencies: default_service_dependencies(),
        }
    }
}

/// Database sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default = "default_db_password")]
    pub password: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
}

fn default_db_user() -> String {
    "user".to_string()
}

fn default_db_password() -> String {
    "admin".to_string()
}

fn default_db_port() -> u16 {
    crate::dockerfile::DATABASE_PORT
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: default_db_user(),
            password: default_db_password(),
            port: default_db_port(),
        }
    }
}

impl DatabaseConfig {
    pub fn credentials(&self) -> DatabaseCredentials {
        DatabaseCredentials {
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

/// Generator CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub cli: CliFlavor,
    /// Overrides the binary looked up on PATH.
    #[serde(default)]
    pub cli_path: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
    /// Directory of `<role>.txt` character overrides.
    #[serde(default)]
    pub characters_dir: Option<PathBuf>,
}

fn default_generator_timeout() -> u64 {
    300
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            cli: CliFlavor::default(),
            cli_path: None,
            model: None,
            timeout_secs: default_generator_timeout(),
            characters_dir: None,
        }
    }
}

impl Validate for GeneratorConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        if self.timeout_secs == 0 {
            result.add_error("generator.timeout_secs must be greater than 0");
        }
        if let Some(dir) = &self.characters_dir {
            if !dir.is_dir() {
                result.add_warning(format!(
                    "generator.characters_dir {} does not exist; built-in characters are used",
                    dir.display()
                ));
            }
        }
        result
    }
}

/// Requirements interview settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementsConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_rounds() -> usize {
    5
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub turns: TurnsConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub requirements: RequirementsConfig,
}

impl PipelineConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    /// Loads `path` if given, else the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Engine settings for one layer.
    pub fn engine_settings(&self, layer: Layer) -> EngineSettings {
        EngineSettings {
            max_turns: self.turns.for_layer(layer),
            log_tail: self.container.log_tail,
            settle_delay: Duration::from_millis(self.container.settle_delay_ms),
        }
    }
}

impl Validate for PipelineConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        result.merge(self.turns.validate());
        result.merge(self.container.validate());
        result.merge(self.generator.validate());

        if self.requirements.max_rounds == 0 {
            result.add_error("requirements.max_rounds must be at least 1");
        }
        if self.database.user.trim().is_empty() {
            result.add_error("database.user cannot be empty");
        }
        if self.service.port == 0 {
            result.add_error("service.port must be greater than 0");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_observed_budgets() {
        let config = PipelineConfig::default();

        assert_eq!(config.turns.data, 5);
        assert_eq!(config.turns.service, 7);
        assert_eq!(config.turns.presentation, 5);
        assert_eq!(config.container.network_name, "Agentcy");
        assert_eq!(config.container.steady_state_timeout_secs, 120);
        assert_eq!(config.service.port, 8000);
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.service.dependencies.len(), 4);
        assert!(config.validate().is_valid());
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.turns.service, 7);
        assert_eq!(config.generator.cli, CliFlavor::Claude);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let toml = r#"
[turns]
service = 3

[generator]
cli = "gemini"
model = "gemini-pro"

[container]
network_name = "Lab"
"#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();

        assert_eq!(config.turns.service, 3);
        assert_eq!(config.turns.data, 5);
        assert_eq!(config.generator.cli, CliFlavor::Gemini);
        assert_eq!(config.generator.model.as_deref(), Some("gemini-pro"));
        assert_eq!(config.container.network_name, "Lab");
        assert_eq!(config.container.log_tail, 50);
    }

    #[test]
    fn load_reads_file_and_reports_parse_errors() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("agentcy.toml");
        std::fs::write(&good, "[database]\npassword = \"secret\"\n").unwrap();
        assert_eq!(PipelineConfig::load(&good).unwrap().database.password, "secret");

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[turns\n").unwrap();
        assert!(matches!(PipelineConfig::load(&bad), Err(Error::Toml(_))));
    }

    #[test]
    fn zero_turns_fail_validation() {
        let mut config = PipelineConfig::default();
        config.turns.presentation = 0;

        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("turns.frontend"));
        assert!(matches!(result.into_result(), Err(Error::Config(_))));
    }

    #[test]
    fn high_turns_only_warn() {
        let mut config = PipelineConfig::default();
        config.turns.service = 20;

        let result = config.validate();
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn empty_network_and_zero_timeouts_fail_validation() {
        let mut config = PipelineConfig::default();
        config.container.network_name = " ".to_string();
        config.container.steady_state_timeout_secs = 0;
        config.generator.timeout_secs = 0;

        assert_eq!(config.validate().errors.len(), 3);
    }

    #[test]
    fn engine_settings_follow_layer_budget() {
        let config = PipelineConfig::default();
        let settings = config.engine_settings(Layer::Service);

        assert_eq!(settings.max_turns, 7);
        assert_eq!(settings.log_tail, 50);
        assert_eq!(settings.settle_delay, Duration::from_secs(2));
    }

    #[test]
    fn poll_policy_defaults_to_fixed_one_second() {
        let policy = ContainerConfig::default().poll_policy();
        assert_eq!(policy.initial, Duration::from_secs(1));
        assert_eq!(policy.max, Duration::from_secs(1));
        assert_eq!(policy.timeout, Duration::from_secs(120));
    }
}
