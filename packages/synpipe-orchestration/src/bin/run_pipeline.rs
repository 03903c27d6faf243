//! Pipeline runner CLI
//!
//! # Usage
//!
//! ```bash
//! # Update every module
//! run-pipeline all
//!
//! # Recompute two experiments of one module, sequentially, failing fast
//! run-pipeline checksum --uids 1521667891.153,1521667902.5 --local --raise-exc
//!
//! # Drop and recompute everything (asks for confirmation)
//! run-pipeline all --rebuild
//! ```

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use synpipe_orchestration::builtin;
use synpipe_orchestration::{
    DirectoryJobSource, JobId, ModuleGraph, ModuleSelection, OrchestratorError, PipelineConfig,
    PipelineOrchestrator, RunRequest,
};
use synpipe_storage::SqliteResultStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "run-pipeline")]
#[command(about = "Process analysis pipeline jobs", long_about = None)]
struct Cli {
    /// Module(s) to update, or "all"
    #[arg(required = true)]
    modules: Vec<String>,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database (overrides config)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Experiment data root (overrides config)
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Drop and rebuild the selected modules
    #[arg(long)]
    rebuild: bool,

    /// Number of parallel workers
    #[arg(long)]
    workers: Option<usize>,

    /// Disable parallel processing
    #[arg(long)]
    local: bool,

    /// Stop at the first job error
    #[arg(long = "raise-exc")]
    raise_exc: bool,

    /// Only process this many jobs per module
    #[arg(long)]
    limit: Option<usize>,

    /// Comma-separated job ids to (re)process
    #[arg(long)]
    uids: Option<String>,

    /// Drop records (all, or --uids) instead of updating
    #[arg(long)]
    drop: bool,

    /// Skip confirmation prompts
    #[arg(short, long)]
    yes: bool,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

/// Destructive steps that need a `y` on stdin before they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Prompts {
    /// `--rebuild` drops whole tables, even when `--uids` narrows the update
    rebuild: bool,
    drop_all: bool,
}

fn prompts(cli: &Cli) -> Prompts {
    Prompts {
        rebuild: cli.rebuild && !cli.yes,
        drop_all: cli.drop && cli.uids.is_none() && !cli.yes,
    }
}

/// 2 for a malformed request or registry, 1 for anything else
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<OrchestratorError>() {
        Some(e) if e.is_structural() => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_yaml(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env()?;
    apply_flags(cli, &mut config);
    config.validate()?;
    Ok(config)
}

/// Command-line values win over file and environment
fn apply_flags(cli: &Cli, config: &mut PipelineConfig) {
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(data_root) = &cli.data_root {
        config.data_root = data_root.clone();
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
}

fn build_request(
    cli: &Cli,
    config: &PipelineConfig,
    job_ids: Option<Vec<JobId>>,
    rebuild: bool,
) -> RunRequest {
    RunRequest {
        modules: ModuleSelection::from_names(&cli.modules),
        rebuild,
        drop: cli.drop,
        job_ids,
        limit: cli.limit,
        // --local means one worker whatever --workers says
        executor: config.executor(!cli.local, cli.raise_exc),
    }
}

fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn confirm(prompt: &str) -> io::Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "{} (y/n) ", prompt)?;
    stderr.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    init_logging(if cli.local { "debug" } else { config.log_filter.as_str() });

    let graph = Arc::new(ModuleGraph::new(builtin::registry())?);

    // Unknown names fail before any prompt or store access
    let modules = graph.resolve(&ModuleSelection::from_names(&cli.modules))?;
    let names: Vec<&str> = modules.iter().map(|m| m.name()).collect();

    let job_ids = cli.uids.as_deref().map(JobId::parse_list).transpose()?;
    let prompts = prompts(&cli);

    let mut rebuild = cli.rebuild;
    if prompts.rebuild {
        rebuild = confirm(&format!(
            "Rebuild will drop every result of: {}. Continue?",
            names.join(", ")
        ))?;
        if !rebuild {
            eprintln!("Rebuild declined; running update only");
        }
    }

    if prompts.drop_all {
        let proceed = confirm(&format!(
            "Drop all results for: {}. Continue?",
            names.join(", ")
        ))?;
        if !proceed {
            eprintln!("Drop cancelled");
            return Ok(());
        }
    }

    let store = Arc::new(
        SqliteResultStore::open(&config.database)
            .with_context(|| format!("opening {}", config.database.display()))?,
    );
    let jobs = Arc::new(DirectoryJobSource::new(&config.data_root));
    let orchestrator = PipelineOrchestrator::new(graph, store, jobs);

    info!(
        "Database {}, data root {}",
        config.database.display(),
        config.data_root.display()
    );

    let request = build_request(&cli, &config, job_ids, rebuild);
    let report = orchestrator.run(&request).await?;

    match cli.format {
        OutputFormat::Text => print!("{}", report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
