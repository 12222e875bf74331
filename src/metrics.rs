//! Run metrics and their persisted form.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineOutcome;
use crate::error::Result;
use crate::project::Layer;

/// Turns spent per layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerTurns {
    pub database: usize,
    pub backend: usize,
    pub frontend: usize,
}

impl LayerTurns {
    pub fn get(&self, layer: Layer) -> usize {
        match layer {
            Layer::Data => self.database,
            Layer::Service => self.backend,
            Layer::Presentation => self.frontend,
        }
    }

    fn set(&mut self, layer: Layer, turns: usize) {
        match layer {
            Layer::Data => self.database = turns,
            Layer::Service => self.backend = turns,
            Layer::Presentation => self.frontend = turns,
        }
    }
}

/// Aggregate record of one pipeline run.
///
/// Mutated additively while layers complete; read-only once finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub project: String,
    pub run_id: String,
    pub elapsed_secs: f64,
    pub turns: LayerTurns,
    /// True when every layer's artifact was accepted.
    pub working: bool,
    /// Verdicts accepted only because the verifier omitted feedback.
    pub default_accepts: usize,
    #[serde(skip)]
    accepted_layers: usize,
}

impl PipelineMetrics {
    pub fn new(project: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            run_id: run_id.into(),
            elapsed_secs: 0.0,
            turns: LayerTurns::default(),
            working: false,
            default_accepts: 0,
            accepted_layers: 0,
        }
    }

    /// Adds one finished layer.
    pub fn record_layer(&mut self, outcome: &EngineOutcome) {
        self.turns.set(outcome.layer, outcome.turns());
        self.default_accepts += outcome.default_accepts();
        if outcome.accepted {
            self.accepted_layers += 1;
        }
    }

    /// Freezes the record with the run's wall-clock time.
    pub fn finish(mut self, elapsed: Duration) -> Self {
        self.elapsed_secs = elapsed.as_secs_f64();
        self.working = self.accepted_layers == Layer::ALL.len();
        self
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Writes the metrics of repeated runs to `<dir>/<project>.json`.
pub fn save_evaluation(dir: &Path, project: &str, runs: &[PipelineMetrics]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", project));
    std::fs::write(&path, serde_json::to_string_pretty(runs)?)?;
    tracing::info!(path = ?path, runs = runs.len(), "evaluation saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{TurnRecord, VerdictStatus, VerificationVerdict};
    use tempfile::TempDir;

    fn outcome(layer: Layer, statuses: &[VerdictStatus], accepted: bool) -> EngineOutcome {
        EngineOutcome {
            layer,
            artifact: "x".to_string(),
            history: statuses
                .iter()
                .enumerate()
                .map(|(turn, status)| TurnRecord {
                    turn,
                    artifact: Some("x".to_string()),
                    verdict: VerificationVerdict {
                        accepted: matches!(
                            status,
                            VerdictStatus::Accepted | VerdictStatus::DefaultAccepted
                        ),
                        feedback: String::new(),
                        log_excerpt: String::new(),
                        status: *status,
                    },
                })
                .collect(),
            accepted,
        }
    }

    #[test]
    fn working_requires_every_layer_accepted() {
        let mut metrics = PipelineMetrics::new("QuickPoll_abcd", "run-1");
        metrics.record_layer(&outcome(Layer::Data, &[VerdictStatus::Accepted], true));
        metrics.record_layer(&outcome(
            Layer::Service,
            &[VerdictStatus::Rejected, VerdictStatus::DefaultAccepted],
            true,
        ));
        metrics.record_layer(&outcome(Layer::Presentation, &[VerdictStatus::Rejected], false));

        let metrics = metrics.finish(Duration::from_millis(1500));

        assert!(!metrics.working);
        assert_eq!(metrics.turns.get(Layer::Service), 2);
        assert_eq!(metrics.default_accepts, 1);
        assert!((metrics.elapsed_secs - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_round_trip_through_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("QuickPoll_abcd").join("metrics.json");

        let mut metrics = PipelineMetrics::new("QuickPoll_abcd", "run-1");
        for layer in Layer::ALL {
            metrics.record_layer(&outcome(layer, &[VerdictStatus::Accepted], true));
        }
        let metrics = metrics.finish(Duration::from_secs(3));
        metrics.save(&path).unwrap();

        let loaded = PipelineMetrics::load(&path).unwrap();
        assert!(loaded.working);
        assert_eq!(loaded.turns, LayerTurns { database: 1, backend: 1, frontend: 1 });

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["turns"]["backend"], 1);
        assert_eq!(raw["project"], "QuickPoll_abcd");
    }

    #[test]
    fn evaluation_is_a_json_array() {
        let dir = TempDir::new().unwrap();
        let runs = vec![
            PipelineMetrics::new("QuickPoll_a", "1").finish(Duration::from_secs(1)),
            PipelineMetrics::new("QuickPoll_b", "2").finish(Duration::from_secs(2)),
        ];

        let path = save_evaluation(&dir.path().join("evaluate"), "QuickPoll", &runs).unwrap();

        assert!(path.ends_with("evaluate/QuickPoll.json"));
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 2);
    }
}
