//! Agentcy CLI
//!
//! - `run`: gather requirements (or load a use case) and build a project
//! - `evaluate`: run a use case repeatedly and collect metrics
//! - `start`: bring an existing project back up without any generation

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use agentcy::config::{PipelineConfig, Validate};
use agentcy::container::{ContainerLifecycleManager, ContainerRuntime, DockerRuntime};
use agentcy::generator::{CliGenerator, Role};
use agentcy::metrics::save_evaluation;
use agentcy::pipeline::{self, PipelineController};
use agentcy::presentation::{self, ConsolePresenter};
use agentcy::project::ProjectContext;
use agentcy::prompts::Characters;
use agentcy::requirements::RequirementsInterview;
use agentcy::usecase::UseCase;
use agentcy::{Error, Result};

#[derive(Parser)]
#[command(name = "agentcy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate, run and verify layered web applications in containers", long_about = None)]
struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a new project
    Run {
        /// Use-case fixture (YAML); skips the requirements interview
        #[arg(short, long)]
        use_case: Option<PathBuf>,

        /// Project name when interviewing
        #[arg(short, long, default_value = "Webapp")]
        name: String,
    },

    /// Run a use case several times and save the metrics of every run
    Evaluate {
        /// Use-case fixture (YAML)
        #[arg(short, long)]
        use_case: PathBuf,

        /// Number of runs
        #[arg(short, long, default_value_t = 10)]
        iterations: usize,

        /// Where the evaluation file is written
        #[arg(long, default_value = "evaluate")]
        output: PathBuf,
    },

    /// Restart an existing project from its saved artifacts
    Start {
        /// Project title, e.g. QuickPoll_ahjr
        project: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = execute(cli).await {
        eprintln!("agentcy failed: {}", e);
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { use_case, name } => run(&config, use_case.as_deref(), &name).await,
        Commands::Evaluate {
            use_case,
            iterations,
            output,
        } => evaluate(&config, &use_case, iterations, &output).await,
        Commands::Start { project } => start(&config, &project).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = PipelineConfig::load_or_default(path)?;
    for warning in config.validate().into_result()? {
        tracing::warn!(%warning, "configuration warning");
    }
    Ok(config)
}

async fn lifecycle(config: &PipelineConfig) -> Result<ContainerLifecycleManager> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect().await?);
    Ok(ContainerLifecycleManager::new(
        runtime,
        config.container.poll_policy(),
    ))
}

fn generator(config: &PipelineConfig) -> Result<CliGenerator> {
    let characters = Characters::load(config.generator.characters_dir.as_deref())?;
    let mut generator = CliGenerator::new(config.generator.cli, characters)
        .with_model(config.generator.model.clone())
        .with_timeout(Duration::from_secs(config.generator.timeout_secs));
    if let Some(path) = &config.generator.cli_path {
        generator = generator.with_cli_path(path.clone());
    }
    Ok(generator)
}

async fn run(config: &PipelineConfig, use_case: Option<&Path>, name: &str) -> Result<()> {
    let lifecycle = lifecycle(config).await?;
    let generator = generator(config)?;

    let (presenter, receiver) = presentation::channel(32);
    let front_end = ConsolePresenter::spawn(receiver);

    let (name, requirements) = match use_case {
        Some(path) => {
            let use_case = UseCase::load(path)?;
            tracing::info!(use_case = %use_case.name, "skipping interview");
            (use_case.name.clone(), use_case.requirements())
        }
        None => {
            let description = presenter
                .ask(Role::Orchestrator, "What web application would you like to build?")
                .await?;
            let interview =
                RequirementsInterview::new(&generator, &presenter, config.requirements.max_rounds);
            (name.to_string(), interview.gather(&description).await?)
        }
    };

    let ctx = ProjectContext::new(
        &name,
        &config.container.projects_dir,
        config.container.network_name.clone(),
    );
    let controller = PipelineController::new(config, &ctx, lifecycle, &generator, presenter);
    let outcome = controller.run(&requirements).await;
    drop(controller);
    let _ = front_end.await;

    let run = outcome?;
    println!("Project: {}", ctx.root().display());
    println!(
        "Turns: database={} backend={} frontend={}",
        run.metrics.turns.database, run.metrics.turns.backend, run.metrics.turns.frontend
    );
    println!("Working: {}", run.metrics.working);
    println!("Elapsed: {:.1}s", run.metrics.elapsed_secs);
    Ok(())
}

async fn evaluate(
    config: &PipelineConfig,
    use_case: &Path,
    iterations: usize,
    output: &Path,
) -> Result<()> {
    if iterations == 0 {
        return Err(Error::Config("iterations must be at least 1".to_string()));
    }

    let use_case = UseCase::load(use_case)?;
    let requirements = use_case.requirements();
    let lifecycle = lifecycle(config).await?;
    let generator = generator(config)?;

    let mut runs = Vec::with_capacity(iterations);
    for iteration in 0..iterations {
        tracing::info!(iteration, iterations, use_case = %use_case.name, "evaluation run");

        let (presenter, receiver) = presentation::channel(32);
        let front_end = presentation::spawn_headless(receiver, String::new());
        let ctx = ProjectContext::new(
            &use_case.name,
            &config.container.projects_dir,
            config.container.network_name.clone(),
        );

        let controller =
            PipelineController::new(config, &ctx, lifecycle.clone(), &generator, presenter);
        let outcome = controller.run(&requirements).await;
        drop(controller);
        let _ = front_end.await;

        match outcome {
            Ok(run) => runs.push(run.metrics),
            Err(e) => tracing::error!(iteration, error = %e, "evaluation run failed"),
        }
    }

    let path = save_evaluation(output, &use_case.name, &runs)?;
    let working = runs.iter().filter(|m| m.working).count();
    println!(
        "{} of {} runs produced a working project; metrics in {}",
        working,
        iterations,
        path.display()
    );
    Ok(())
}

async fn start(config: &PipelineConfig, project: &str) -> Result<()> {
    let ctx = ProjectContext::existing(
        project,
        &config.container.projects_dir,
        config.container.network_name.clone(),
    )?;
    let lifecycle = lifecycle(config).await?;

    let restarted = pipeline::restart(config, &ctx, lifecycle).await?;
    println!("Database: {}", restarted.database_url);
    println!("Backend:  {}", restarted.service_url);
    println!("Frontend: {}", restarted.content_url);
    Ok(())
}
