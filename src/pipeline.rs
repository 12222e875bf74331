//! Top-level sequencer: data, then service, then presentation.
//!
//! Layers and turns run strictly one after another. The only cross-layer
//! consistency rule is that every service retry starts against a freshly
//! created database.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::container::ContainerLifecycleManager;
use crate::dockerfile;
use crate::engine::{EngineOutcome, LayerRequest, RetryEngine, TurnHook};
use crate::error::{Error, Result};
use crate::generator::{Conversation, Generator, Role};
use crate::metrics::PipelineMetrics;
use crate::presentation::PresentationHandle;
use crate::project::{Layer, ProjectContext};
use crate::prompts::DocumentationPromptBuilder;
use crate::requirements::Requirements;
use crate::sandbox::{ContentSandbox, DatabaseCredentials, DatabaseSandbox, Sandbox, ServiceSandbox};

/// Everything one pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub metrics: PipelineMetrics,
    pub outcomes: Vec<EngineOutcome>,
    /// Documentation per layer, in layer order.
    pub docs: Vec<(Layer, String)>,
}

impl PipelineRun {
    pub fn outcome(&self, layer: Layer) -> Option<&EngineOutcome> {
        self.outcomes.iter().find(|o| o.layer == layer)
    }

    pub fn docs(&self, layer: Layer) -> Option<&str> {
        self.docs
            .iter()
            .find(|(l, _)| *l == layer)
            .map(|(_, d)| d.as_str())
    }
}

/// Re-creates the database before every service turn after the first.
struct DatabaseReset<'a> {
    ctx: &'a ProjectContext,
    lifecycle: ContainerLifecycleManager,
    credentials: DatabaseCredentials,
    database: DatabaseSandbox,
}

impl DatabaseReset<'_> {
    fn url(&self) -> String {
        self.database.url()
    }
}

#[async_trait]
impl TurnHook for DatabaseReset<'_> {
    async fn before_turn(&mut self, layer: Layer, turn: usize) -> Result<()> {
        if layer != Layer::Service || turn == 0 {
            return Ok(());
        }

        tracing::info!(turn, "resetting database before service retry");
        self.database =
            DatabaseSandbox::create(self.ctx, self.lifecycle.clone(), self.credentials.clone())
                .await?;
        Ok(())
    }
}

/// Drives one project through all layers.
pub struct PipelineController<'a> {
    config: &'a PipelineConfig,
    ctx: &'a ProjectContext,
    lifecycle: ContainerLifecycleManager,
    generator: &'a dyn Generator,
    presenter: PresentationHandle,
}

impl<'a> PipelineController<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        ctx: &'a ProjectContext,
        lifecycle: ContainerLifecycleManager,
        generator: &'a dyn Generator,
        presenter: PresentationHandle,
    ) -> Self {
        Self {
            config,
            ctx,
            lifecycle,
            generator,
            presenter,
        }
    }

    /// Builds every layer from agreed requirements and persists the metrics.
    ///
    /// Metrics are saved even when a layer fails, covering the layers that
    /// finished before it.
    pub async fn run(&self, requirements: &Requirements) -> Result<PipelineRun> {
        let started = Instant::now();
        let ctx = self.ctx;
        let mut metrics = PipelineMetrics::new(ctx.title(), ctx.run_id());

        tracing::info!(project = %ctx.title(), run_id = %ctx.run_id(), "pipeline starting");

        let built = self.build_layers(requirements, &mut metrics).await;
        let metrics = metrics.finish(started.elapsed());
        let (outcomes, docs) = match built {
            Ok(built) => built,
            Err(e) => {
                if let Err(save) = metrics.save(&ctx.metrics_path()) {
                    tracing::warn!(error = %save, "could not save partial metrics");
                }
                tracing::error!(
                    project = %ctx.title(),
                    error = %e,
                    database = metrics.turns.database,
                    backend = metrics.turns.backend,
                    frontend = metrics.turns.frontend,
                    "pipeline aborted"
                );
                return Err(e);
            }
        };
        metrics.save(&ctx.metrics_path())?;

        tracing::info!(
            project = %ctx.title(),
            working = metrics.working,
            elapsed_secs = metrics.elapsed_secs,
            database = metrics.turns.database,
            backend = metrics.turns.backend,
            frontend = metrics.turns.frontend,
            "pipeline finished"
        );
        self.presenter
            .show(
                Role::Orchestrator,
                format!(
                    "Project {} is ready in {}",
                    ctx.title(),
                    ctx.root().display()
                ),
            )
            .await?;

        Ok(PipelineRun {
            metrics,
            outcomes,
            docs,
        })
    }

    /// Runs the three layers in order, recording each one as soon as its engine returns.
    async fn build_layers(
        &self,
        requirements: &Requirements,
        metrics: &mut PipelineMetrics,
    ) -> Result<(Vec<EngineOutcome>, Vec<(Layer, String)>)> {
        let ctx = self.ctx;
        let mut outcomes = Vec::with_capacity(Layer::ALL.len());
        let mut docs: Vec<(Layer, String)> = Vec::with_capacity(Layer::ALL.len());

        let created = self.lifecycle.ensure_network(ctx.network()).await?;
        tracing::debug!(network = %ctx.network(), created, "network ready");

        let credentials = self.config.database.credentials();
        let database =
            DatabaseSandbox::create(ctx, self.lifecycle.clone(), credentials.clone()).await?;

        // Data layer: judged on text alone.
        let data_request = LayerRequest::new(Layer::Data, requirements.tasks.for_layer(Layer::Data))
            .with_prior_docs(requirements.summary.as_str());
        let data = self.engine(Layer::Data).run(&data_request, None, None).await?;
        metrics.record_layer(&data);
        self.persist_artifact(&data)?;
        let data_docs = self.document(&data).await?;
        docs.push((Layer::Data, data_docs));
        outcomes.push(data);

        // Service layer: runs against the database, reset before each retry.
        let mut reset = DatabaseReset {
            ctx,
            lifecycle: self.lifecycle.clone(),
            credentials,
            database,
        };
        let mut service_sandbox = ServiceSandbox::new(
            ctx,
            self.lifecycle.clone(),
            self.config.service.port,
            self.config.service.dependencies.clone(),
        )?;
        let service_request =
            LayerRequest::new(Layer::Service, requirements.tasks.for_layer(Layer::Service))
                .with_prior_docs(join_docs(&docs))
                .with_environment(vec![
                    format!("The database is reachable at {}", reset.url()),
                    "The database starts empty on every run; create the tables from the schema at startup."
                        .to_string(),
                    format!("The service must listen on 0.0.0.0 port {}.", self.config.service.port),
                ]);
        let service = self
            .engine(Layer::Service)
            .run(&service_request, Some(&mut service_sandbox), Some(&mut reset))
            .await?;
        metrics.record_layer(&service);
        self.persist_artifact(&service)?;
        let service_docs = self.document(&service).await?;
        docs.push((Layer::Service, service_docs.clone()));
        outcomes.push(service);

        // Presentation layer: its verifier checks against the service docs.
        // The page runs in the user's browser, so it calls the published port.
        let mut content_sandbox = ContentSandbox::new(ctx, self.lifecycle.clone())?;
        let presentation_request = LayerRequest::new(
            Layer::Presentation,
            requirements.tasks.for_layer(Layer::Presentation),
        )
        .with_prior_docs(join_docs(&docs))
        .with_service_docs(service_docs)
        .with_environment(vec![format!(
            "The backend is reachable from the browser at {}",
            service_sandbox.host_url()
        )]);
        let presentation = self
            .engine(Layer::Presentation)
            .run(&presentation_request, Some(&mut content_sandbox), None)
            .await?;
        metrics.record_layer(&presentation);
        self.persist_artifact(&presentation)?;
        let presentation_docs = self.document(&presentation).await?;
        docs.push((Layer::Presentation, presentation_docs));
        outcomes.push(presentation);

        Ok((outcomes, docs))
    }

    fn engine(&self, layer: Layer) -> RetryEngine<'_> {
        RetryEngine::new(
            self.generator,
            &self.presenter,
            self.config.engine_settings(layer),
        )
    }

    /// Writes the layer's final artifact over whatever the last turn left.
    fn persist_artifact(&self, outcome: &EngineOutcome) -> Result<()> {
        let workspace = self.ctx.workspace(outcome.layer);
        std::fs::create_dir_all(&workspace)?;
        std::fs::write(
            workspace.join(outcome.layer.artifact_file()),
            &outcome.artifact,
        )?;
        Ok(())
    }

    /// Asks the layer's documenter for docs and writes them to `docs/<layer>.md`.
    async fn document(&self, outcome: &EngineOutcome) -> Result<String> {
        let layer = outcome.layer;
        let mut documenter = Conversation::new(Role::Documenter(layer));
        let prompt = DocumentationPromptBuilder::new(layer, outcome.artifact.as_str()).build();
        let text = documenter.ask(self.generator, &prompt).await?;
        self.presenter.show(documenter.role(), text.as_str()).await?;

        let docs_dir = self.ctx.docs_dir();
        std::fs::create_dir_all(&docs_dir)?;
        std::fs::write(docs_dir.join(format!("{}.md", layer.dir_name())), &text)?;
        Ok(text)
    }
}

fn join_docs(docs: &[(Layer, String)]) -> String {
    docs.iter()
        .map(|(layer, text)| format!("## {} documentation\n\n{}", layer, text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Host-side addresses of a restarted project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartedProject {
    pub database_url: String,
    pub service_url: String,
    pub content_url: String,
}

/// Rebuilds an existing project's sandboxes from its persisted artifacts.
///
/// No generator is involved; the service port is read back from the script.
pub async fn restart(
    config: &PipelineConfig,
    ctx: &ProjectContext,
    lifecycle: ContainerLifecycleManager,
) -> Result<RestartedProject> {
    let script = read_artifact(ctx, Layer::Service)?;
    let markup = read_artifact(ctx, Layer::Presentation)?;

    lifecycle.ensure_network(ctx.network()).await?;

    let database =
        DatabaseSandbox::create(ctx, lifecycle.clone(), config.database.credentials()).await?;

    let port = dockerfile::infer_port(&script);
    let mut service = ServiceSandbox::new(
        ctx,
        lifecycle.clone(),
        port,
        config.service.dependencies.clone(),
    )?;
    service.execute(&script, None).await?;

    let mut content = ContentSandbox::new(ctx, lifecycle)?;
    content.execute(&markup, None).await?;

    tracing::info!(project = %ctx.title(), port, "project restarted");
    Ok(RestartedProject {
        database_url: database.host_url(),
        service_url: service.host_url(),
        content_url: content.host_url(),
    })
}

fn read_artifact(ctx: &ProjectContext, layer: Layer) -> Result<String> {
    let path = ctx.workspace(layer).join(layer.artifact_file());
    if !path.is_file() {
        return Err(Error::InvalidProject(path));
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Whether `dir` looks like a project produced by [`PipelineController::run`].
pub fn is_project_dir(dir: &Path) -> bool {
    Layer::ALL
        .iter()
        .all(|layer| dir.join(layer.dir_name()).join(layer.artifact_file()).is_file())
}
