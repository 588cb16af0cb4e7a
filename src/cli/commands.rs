//! CLI command definitions for synda.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::cache::StepCache;
use crate::config::{PipelineDefinition, Settings};
use crate::llm::HttpModelProvider;
use crate::model::Provider;
use crate::pipeline::{Interrupt, Pipeline, PipelineOutcome};
use crate::storage::Database;

/// Synthetic data pipeline engine.
#[derive(Parser)]
#[command(name = "synda")]
#[command(about = "Generate, filter and annotate synthetic text datasets with full provenance")]
#[command(version)]
#[command(
    long_about = "synda runs YAML-defined pipelines of split, generation, ablation, clean and metadata steps over a CSV input.\n\nEvery intermediate node is stored with its lineage, so failed runs can be retried and interrupted runs resumed.\n\nExample usage:\n  synda provider add openai --api-key sk-...\n  synda generate pipeline.yaml"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a pipeline, retry the last failed step, or resume a run.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Inspect or clear the step output cache.
    Cache(CacheArgs),

    /// Manage model provider credentials.
    Provider(ProviderArgs),
}

/// Arguments for `synda generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Pipeline definition file (YAML).
    pub config: PathBuf,

    /// Retry the most recently failed step instead of starting a new run.
    #[arg(long, conflicts_with = "resume")]
    pub retry: bool,

    /// Resume the given run from its first incomplete step.
    #[arg(long, value_name = "RUN_ID")]
    pub resume: Option<i64>,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum CacheSubcommand {
    /// Delete cached step outputs.
    Clear {
        /// Only delete entries of this step.
        #[arg(long)]
        step: Option<i64>,
    },

    /// Show cache location and size.
    Info,
}

#[derive(Parser, Debug)]
pub struct ProviderArgs {
    #[command(subcommand)]
    pub command: ProviderSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum ProviderSubcommand {
    /// Store credentials for a new provider.
    Add {
        name: String,

        #[arg(long)]
        api_key: String,

        /// Base URL overriding the built-in one.
        #[arg(long)]
        api_url: Option<String>,
    },

    /// Remove a provider.
    Delete { name: String },

    /// Change the key and/or URL of a provider.
    Update {
        name: String,

        #[arg(long)]
        api_key: Option<String>,

        #[arg(long)]
        api_url: Option<String>,
    },
}

/// Parse CLI arguments.
///
/// Call this first to get the log level, then initialize logging, then call
/// `run_with_cli()`.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and run the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_env().context("failed to read engine settings")?;

    match cli.command {
        Commands::Generate(args) => run_generate_command(args, &settings).await,
        Commands::Cache(args) => run_cache_command(args.command, &settings).await,
        Commands::Provider(args) => run_provider_command(args.command, &settings).await,
    }
}

async fn open_database(settings: &Settings) -> anyhow::Result<Database> {
    Database::open(&settings.database_path)
        .await
        .with_context(|| {
            format!(
                "failed to open database {}",
                settings.database_path.display()
            )
        })
}

async fn open_cache(settings: &Settings) -> anyhow::Result<StepCache> {
    let path = settings.cache_path();
    StepCache::open(&path, settings.cache_enabled)
        .await
        .with_context(|| format!("failed to open cache {}", path.display()))
}

// ============================================================================
// Generate
// ============================================================================

async fn run_generate_command(args: GenerateArgs, settings: &Settings) -> anyhow::Result<()> {
    let db = open_database(settings).await?;
    let cache = open_cache(settings).await?;
    let models = HttpModelProvider::new().context("failed to build HTTP client")?;

    let interrupt = Interrupt::new();
    spawn_interrupt_listener(interrupt.clone());

    let pipeline = Pipeline::new(db, cache, Arc::new(models)).with_interrupt(interrupt);

    let mut outcome = if args.retry {
        println!("Retrying the last failed step");
        pipeline.retry().await.context("retry failed")?
    } else if let Some(run_id) = args.resume {
        println!("Resuming run {}", run_id);
        pipeline
            .resume(run_id)
            .await
            .with_context(|| format!("failed to resume run {}", run_id))?
    } else {
        let definition = PipelineDefinition::from_yaml_file(&args.config).with_context(|| {
            format!("invalid pipeline definition {}", args.config.display())
        })?;
        println!(
            "Running {} with {} steps",
            args.config.display(),
            definition.pipeline.len()
        );
        pipeline.execute(&definition).await.context("pipeline failed")?
    };

    loop {
        match outcome {
            PipelineOutcome::Finished { run_id, nodes } => {
                print_run_summary(&pipeline, run_id).await?;
                println!("✓ Run {} finished with {} nodes", run_id, nodes.len());
                return Ok(());
            }
            PipelineOutcome::Interrupted { run_id } => {
                if confirm_stop().await? {
                    pipeline.stop(run_id).await?;
                    println!("Run {} stopped. Resume it with:", run_id);
                    println!(
                        "  synda generate {} --resume {}",
                        args.config.display(),
                        run_id
                    );
                    return Ok(());
                }

                info!(run_id, "Continuing interrupted run");
                pipeline.interrupt().reset();
                outcome = pipeline
                    .resume(run_id)
                    .await
                    .with_context(|| format!("failed to resume run {}", run_id))?;
            }
        }
    }
}

/// Sets `interrupt` on every Ctrl-C until the process exits.
fn spawn_interrupt_listener(interrupt: Interrupt) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                return;
            }
            interrupt.trigger();
            println!("\nInterrupt received, pausing at the next safe point...");
        }
    });
}

async fn confirm_stop() -> anyhow::Result<bool> {
    print!("Stop the run? [y/N] ");
    std::io::stdout().flush()?;

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .context("prompt task failed")?
    .context("failed to read answer")?;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn print_run_summary(pipeline: &Pipeline, run_id: i64) -> anyhow::Result<()> {
    let steps = pipeline.database().run_steps(run_id).await?;
    for step in steps {
        println!(
            "  [{}] {} ({}/{}): {}",
            step.position,
            step.name,
            step.step_type,
            step.method,
            step.status.as_str()
        );
    }
    Ok(())
}

// ============================================================================
// Cache
// ============================================================================

async fn run_cache_command(command: CacheSubcommand, settings: &Settings) -> anyhow::Result<()> {
    let cache = open_cache(settings).await?;

    match command {
        CacheSubcommand::Clear { step } => {
            let removed = match step {
                Some(step_id) => cache.clear_for_step(step_id).await?,
                None => cache.clear().await?,
            };
            println!("✓ Removed {} cache entries", removed);
        }
        CacheSubcommand::Info => {
            let info = cache.info().await?;
            println!("Cache:   {}", info.path.display());
            println!("Enabled: {}", info.enabled);
            println!("Entries: {}", info.entries);
            println!("Steps:   {}", info.steps);
        }
    }
    Ok(())
}

// ============================================================================
// Provider
// ============================================================================

async fn run_provider_command(
    command: ProviderSubcommand,
    settings: &Settings,
) -> anyhow::Result<()> {
    let db = open_database(settings).await?;
    apply_provider_command(&db, command).await
}

async fn apply_provider_command(db: &Database, command: ProviderSubcommand) -> anyhow::Result<()> {
    match command {
        ProviderSubcommand::Add {
            name,
            api_key,
            api_url,
        } => {
            let mut provider = Provider::new(&name, api_key);
            if let Some(url) = api_url {
                provider = provider.with_api_url(url);
            }
            db.add_provider(&provider)
                .await
                .with_context(|| format!("failed to add provider '{}'", name))?;
            println!("✓ Provider '{}' added", name);
        }
        ProviderSubcommand::Delete { name } => {
            db.delete_provider(&name)
                .await
                .with_context(|| format!("failed to delete provider '{}'", name))?;
            println!("✓ Provider '{}' deleted", name);
        }
        ProviderSubcommand::Update {
            name,
            api_key,
            api_url,
        } => {
            if api_key.is_none() && api_url.is_none() {
                anyhow::bail!("nothing to update: pass --api-key and/or --api-url");
            }
            db.update_provider(&name, api_key.as_deref(), api_url.as_deref())
                .await
                .with_context(|| format!("failed to update provider '{}'", name))?;
            println!("✓ Provider '{}' updated", name);
        }
    }
    Ok(())
}
