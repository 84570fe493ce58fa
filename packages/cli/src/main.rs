#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Headless runner for enablement index analyses.
//!
//! Loads an analysis configuration, splits the study area into parts,
//! scores the parts on a bounded pool of blocking workers, then mosaics the
//! outputs and writes a JSON run report next to them.
//!
//! Uses `indicatif-log-bridge` (via [`geest_cli_utils::init_logger`]) to
//! route `log` output through `indicatif::MultiProgress` so that log lines
//! and progress bars never fight for the terminal.

mod scheduler;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use geest_model_models::AnalysisConfig;
use geest_tables::{TableSet, parse_table_toml};
use geest_workflow::{CancellationToken, FileLayerProvider, RunReport, Workflow, WorkflowError};

const REPORT_FILE: &str = "run_report.json";

#[derive(Parser)]
#[command(name = "geest", about = "Geospatial enablement index runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every part of the study area and mosaic the outputs
    Run {
        /// Analysis configuration (TOML)
        config: PathBuf,
        /// Parts processed at once; overrides `analysis.workers`
        #[arg(long)]
        workers: Option<usize>,
        /// Output directory; overrides `analysis.output_dir`
        #[arg(long)]
        output: Option<PathBuf>,
        /// Directory of extra table definitions (`*.toml`)
        #[arg(long)]
        tables: Option<PathBuf>,
        /// Directory relative layer paths are resolved against. Defaults to
        /// the configuration's directory.
        #[arg(long)]
        layers: Option<PathBuf>,
    },
    /// Validate a configuration and list its study-area parts
    Check {
        /// Analysis configuration (TOML)
        config: PathBuf,
        /// Directory of extra table definitions (`*.toml`)
        #[arg(long)]
        tables: Option<PathBuf>,
        /// Directory relative layer paths are resolved against
        #[arg(long)]
        layers: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = geest_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            workers,
            output,
            tables,
            layers,
        } => {
            let mut analysis = AnalysisConfig::load(&config)?;
            if let Some(workers) = workers {
                analysis.analysis.workers = workers;
            }
            if let Some(output) = output {
                analysis.analysis.output_dir = output;
            }
            let workflow = build_workflow(&config, analysis, tables.as_deref(), layers)?;
            run(Arc::new(workflow), &multi).await?;
        }
        Commands::Check {
            config,
            tables,
            layers,
        } => {
            let analysis = AnalysisConfig::load(&config)?;
            let workflow = build_workflow(&config, analysis, tables.as_deref(), layers)?;
            let parts = workflow.study_parts()?;
            log::info!("Configuration is valid; {} parts", parts.len());
            for part in &parts {
                println!("{}", part.id);
            }
        }
    }

    Ok(())
}

fn build_workflow(
    config_path: &Path,
    config: AnalysisConfig,
    tables: Option<&Path>,
    layers: Option<PathBuf>,
) -> Result<Workflow, Box<dyn std::error::Error>> {
    let root = layers.unwrap_or_else(|| {
        config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    });
    let provider = Arc::new(FileLayerProvider::new(root));
    Ok(Workflow::new(config, load_tables(tables)?, provider)?)
}

/// The embedded tables, with every `*.toml` definition in `dir` added on
/// top. A definition replaces an embedded table of the same name.
fn load_tables(dir: Option<&Path>) -> Result<TableSet, Box<dyn std::error::Error>> {
    let mut tables = TableSet::embedded();
    let Some(dir) = dir else {
        return Ok(tables);
    };

    let mut paths = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.retain(|p| p.extension().is_some_and(|e| e == "toml"));
    paths.sort();

    for path in &paths {
        let definition = parse_table_toml(&std::fs::read_to_string(path)?)?;
        tables.insert(definition)?;
        log::debug!("Loaded table definition {}", path.display());
    }
    log::info!("Loaded {} table definitions from {}", paths.len(), dir.display());
    Ok(tables)
}

async fn run(
    workflow: Arc<Workflow>,
    multi: &indicatif::MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let started_at = chrono::Utc::now();
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted; finishing the current phase of running parts");
                cancel.cancel();
            }
        });
    }

    let tasks = workflow.study_parts()?;
    let workers = workflow.config().analysis.workers;
    let parts =
        scheduler::run_parts(Arc::clone(&workflow), tasks, workers, &cancel, Some(multi)).await?;

    let mut report = RunReport::new(
        started_at,
        workflow.crs().to_string(),
        workflow.config().analysis.resolution,
        parts.clone(),
    );

    let region = tokio::task::spawn_blocking({
        let workflow = Arc::clone(&workflow);
        let cancel = cancel.clone();
        move || workflow.finish_region(&parts, &cancel)
    })
    .await?;

    match region {
        Ok(region) => report = report.with_region(region),
        Err(WorkflowError::Cancelled) => log::warn!("Skipped the region step after cancellation"),
        Err(e) => return Err(e.into()),
    }

    let path = workflow.config().analysis.output_dir.join(REPORT_FILE);
    report.write(&path)?;

    if report.is_success() {
        log::info!(
            "Run finished in {}s",
            (report.finished_at - started_at).num_seconds()
        );
        Ok(())
    } else {
        Err(format!("Run finished with failures; see {}", path.display()).into())
    }
}
