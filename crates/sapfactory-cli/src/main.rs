//! SAP Factory CLI
//!
//! The `sapfactory` command plans and executes SAP implementation models.
//!
//! ## Commands
//!
//! - `validate`: Check a model without planning it
//! - `plan`: Print the ordered job plan for a model
//! - `run`: Execute a model and write artifacts plus a KPI summary
//! - `adapters`: List the registered adapter names

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use sapfactory_core::telemetry::{init_tracing, parse_level};
use sapfactory_core::{
    build_plan, validate, AdapterRegistry, Executor, FactoryConfig, FactoryContext,
    FsArtifactStore, ImplementationModel, JobStatus, Plan, PluginSet, Run, RunRegistry,
    RunStatus,
};

#[derive(Parser)]
#[command(name = "sapfactory")]
#[command(author = "SAP Factory")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Automated SAP S/4HANA implementation runs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "SAPFACTORY_LOG_JSON")]
    json: bool,

    /// Engine configuration file (.json, .yaml or .yml)
    #[arg(short, long, global = true, env = "SAPFACTORY_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for run artifacts
    #[arg(long, global = true, env = "SAPFACTORY_ARTIFACTS_DIR")]
    artifacts_dir: Option<PathBuf>,

    /// Adapter used for every target system
    #[arg(long, global = true, env = "SAPFACTORY_ADAPTER")]
    adapter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a model is well-formed and internally consistent
    Validate {
        /// Path to the implementation model (JSON or YAML)
        model: PathBuf,
    },

    /// Print the job plan for a model
    Plan {
        /// Path to the implementation model (JSON or YAML)
        model: PathBuf,

        /// Print a one-line-per-job overview instead of the full JSON plan
        #[arg(long)]
        summary: bool,
    },

    /// Execute a model against the configured adapter
    Run {
        /// Path to the implementation model (JSON or YAML)
        model: PathBuf,

        /// Plan and simulate every job without touching any target system
        #[arg(long)]
        dry_run: bool,

        /// Print the KPI summary as JSON
        #[arg(long)]
        report: bool,
    },

    /// List registered adapters
    Adapters,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        parse_level(&config.log.level)
    };
    init_tracing(config.log.json, level);

    match cli.command {
        Commands::Validate { model } => cmd_validate(&model),
        Commands::Plan { model, summary } => cmd_plan(&config, &model, summary),
        Commands::Run {
            model,
            dry_run,
            report,
        } => cmd_run(&config, &model, dry_run, report).await,
        Commands::Adapters => cmd_adapters(&config),
    }
}

/// Load the configuration file (if any) and apply flag and environment overrides.
fn load_config(cli: &Cli) -> Result<FactoryConfig> {
    let mut config = match &cli.config {
        Some(path) => FactoryConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => FactoryConfig::default(),
    };
    if let Some(dir) = &cli.artifacts_dir {
        config.artifacts_dir = dir.clone();
    }
    if let Some(adapter) = &cli.adapter {
        config.adapter = adapter.clone();
    }
    if cli.json {
        config.log.json = true;
    }
    Ok(config)
}

fn load_model(path: &Path) -> Result<ImplementationModel> {
    ImplementationModel::from_path(path)
        .with_context(|| format!("Failed to read model from {:?}", path))
}

fn cmd_validate(path: &Path) -> Result<()> {
    let model = load_model(path)?;
    validate(&model).with_context(|| format!("Model {:?} is invalid", path))?;

    println!("Model OK: {} ({})", model.project.name, model.project.customer);
    println!("Systems:     {}", model.landscape.systems.len());
    println!("Packages:    {}", model.customizing.packages.len());
    println!("Objects:     {}", model.migration.objects.len());
    println!("Suites:      {}", model.testing.suites.len());
    Ok(())
}

fn plan_model(config: &FactoryConfig, path: &Path) -> Result<Plan> {
    let model = load_model(path)?;
    build_plan(&model, &config.estimates).with_context(|| format!("Model {:?} is invalid", path))
}

fn cmd_plan(config: &FactoryConfig, path: &Path, summary: bool) -> Result<()> {
    let plan = plan_model(config, path)?;

    if !summary {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Plan for {} ({})", plan.project, plan.customer);
    println!("Model digest: {}", plan.model_digest);
    for job in &plan.jobs {
        println!(
            "  {:>3}. {:<32} {:<4} {}",
            job.sequence, job.id, job.target_system, job.label
        );
    }
    let counts: Vec<String> = plan
        .kind_counts()
        .iter()
        .map(|(kind, n)| format!("{} {}", n, kind))
        .collect();
    println!("\nJobs: {} ({})", plan.total_jobs(), counts.join(", "));
    println!("Estimated duration: {} min", plan.estimated_duration_minutes);
    println!("Estimated manual effort: {:.1} h", plan.estimated_manual_hours);
    Ok(())
}

/// Build a run registry backed by the filesystem artifact store.
fn build_registry(config: &FactoryConfig) -> Result<RunRegistry> {
    let adapters = AdapterRegistry::with_defaults();
    if !adapters.contains(&config.adapter) {
        anyhow::bail!(
            "Unknown adapter '{}' (available: {})",
            config.adapter,
            adapters.names().join(", ")
        );
    }
    let store = FsArtifactStore::new(&config.artifacts_dir).with_context(|| {
        format!(
            "Failed to open artifact store at {:?}",
            config.artifacts_dir
        )
    })?;
    let ctx = FactoryContext::new(Arc::new(adapters), Arc::new(store), config.clone());
    Ok(RunRegistry::new(Executor::new(
        Arc::new(ctx),
        PluginSet::standard(),
    )))
}

/// Submit `path` and wait for it to finish; Ctrl-C requests cancellation.
async fn run_model(config: &FactoryConfig, path: &Path, dry_run: bool) -> Result<Arc<Run>> {
    let model = load_model(path)?;
    let registry = build_registry(config)?;

    let run_id = registry.submit(model, dry_run);
    info!(run_id = %run_id, "waiting for run");

    let run = tokio::select! {
        run = registry.wait(&run_id) => run?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling run {} ...", run_id);
            registry.cancel(&run_id)?;
            registry.wait(&run_id).await?
        }
    };
    Ok(run)
}

async fn cmd_run(config: &FactoryConfig, path: &Path, dry_run: bool, report: bool) -> Result<()> {
    let run = run_model(config, path, dry_run).await?;

    if report {
        println!("{}", serde_json::to_string_pretty(&run.summary)?);
    } else {
        print_run(&run, &config.artifacts_dir);
    }

    if run.status != RunStatus::Completed {
        anyhow::bail!(
            "Run {} failed: {}",
            run.run_id,
            run.error.as_deref().unwrap_or("unknown error")
        );
    }
    if run.count(JobStatus::Failed) > 0 {
        anyhow::bail!("Run {} completed with failed jobs", run.run_id);
    }
    Ok(())
}

fn print_run(run: &Run, artifacts_dir: &Path) {
    let mode = if run.dry_run { " (dry run)" } else { "" };
    println!("Run {} {}{}", run.run_id, run.status, mode);
    println!("Project: {} ({})", run.project, run.customer);

    for result in &run.results {
        println!(
            "  [{:<9}] {:<32} {:<4} attempts={}",
            result.status, result.job_id, result.target_system, result.attempts
        );
        if let Some(err) = &result.error {
            println!("              {}", err.message);
        }
        if let Some(reason) = &result.skip_reason {
            println!("              {}", reason);
        }
    }

    if let Some(error) = &run.error {
        println!("\nError: {}", error);
    }
    if let Some(summary) = &run.summary {
        println!(
            "\nJobs: {} total, {} succeeded, {} failed, {} skipped",
            summary.total_jobs, summary.completed_jobs, summary.failed_jobs, summary.skipped_jobs
        );
        println!(
            "Records: {} processed, {} succeeded, {} failed",
            summary.total_records, summary.success_records, summary.failed_records
        );
        println!(
            "Success rate: {:.1}%  Automation rate: {:.1}%  Cost savings: {:.1}%",
            summary.success_rate, summary.automation_rate, summary.cost_savings_percent
        );
    }
    println!(
        "Artifacts: {}",
        artifacts_dir.join(run.run_id.as_str()).display()
    );
}

fn cmd_adapters(config: &FactoryConfig) -> Result<()> {
    let adapters = AdapterRegistry::with_defaults();
    for name in adapters.names() {
        let marker = if name == config.adapter { "*" } else { " " };
        println!("{} {}", marker, name);
    }
    Ok(())
}
