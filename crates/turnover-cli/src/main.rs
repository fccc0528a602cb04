//! Turnover CLI
//!
//! Small front end over the store and the reconciler:
//! - write rows the way another session would (`add-*`, `touch`)
//! - run passes on demand (`sync`) or in the background (`watch`)
//! - block on a single analysis (`load`)

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};
use turnover_model::{ChangeEvent, PeptideAnalysisSummary, Workspace, WorkspaceSummary};
use turnover_reconciler::{
    Collaborators, PassSummary, PendingWorkQueue, Reconciler, ReconcilerStatus, TurnoverConfig,
};
use turnover_store::{
    ChangeLogRow, MsDataFileRow, PeptideAnalysisRow, PeptideFileAnalysisRow, PeptideRow,
    SqliteStore, StoreWriter,
};

#[derive(Parser)]
#[command(name = "turnover")]
#[command(
    author,
    version,
    about = "Turnover: incremental workspace reconciliation over a shared store"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// JSON config file (`{"store": {...}, "reconciler": {...}}`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database; overrides `store.database_path`.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Overrides `reconciler.poll_interval_ms`.
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Overrides `reconciler.requery_threshold`.
    #[arg(long, global = true)]
    requery_threshold: Option<usize>,

    /// Re-check for races while holding the write lock.
    #[arg(long, global = true)]
    strict_race_check: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema (and optionally name the workspace).
    Init {
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        data_directory: String,
    },

    /// Insert a peptide.
    AddPeptide {
        #[arg(long)]
        sequence: String,
        #[arg(long, default_value = "")]
        protein: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = 0)]
        max_tracers: i64,
        /// Also append a change-log record.
        #[arg(long)]
        log: bool,
    },

    /// Insert an MS data file.
    AddFile {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        label: String,
        #[arg(long, default_value = "")]
        cohort: String,
        #[arg(long, default_value = "")]
        sample: String,
        #[arg(long)]
        time_point: Option<f64>,
        #[arg(long)]
        log: bool,
    },

    /// Insert a peptide analysis.
    AddAnalysis {
        #[arg(long)]
        peptide: i64,
        #[arg(long, default_value_t = 1)]
        min_charge: i64,
        #[arg(long, default_value_t = 5)]
        max_charge: i64,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long)]
        log: bool,
    },

    /// Insert a file analysis under an analysis (always logged against the
    /// parent analysis).
    AddFileAnalysis {
        #[arg(long)]
        analysis: i64,
        #[arg(long)]
        file: i64,
        #[arg(long, default_value_t = 0)]
        chromatograms: i64,
        #[arg(long, default_value_t = 0)]
        peaks: i64,
    },

    /// Append a change-log record. `--workspace` alone requests a full reload.
    Touch {
        #[arg(long)]
        workspace: Option<i64>,
        #[arg(long)]
        peptide: Option<i64>,
        #[arg(long)]
        file: Option<i64>,
        #[arg(long)]
        analysis: Option<i64>,
    },

    /// Load the workspace from scratch (passes until one commits) and print it.
    Sync {
        /// Print the whole graph as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run the background worker for a while, logging committed changes.
    Watch {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },

    /// Block until the analysis exists, then print it.
    Load {
        id: i64,
        /// Report absence instead of waiting for the row.
        #[arg(long)]
        no_wait: bool,
    },
}

/// Forwards pending ids to the log.
struct LogQueue {
    name: &'static str,
}

impl PendingWorkQueue for LogQueue {
    fn add_file_analysis_ids(&self, ids: &[i64]) {
        tracing::info!(queue = self.name, count = ids.len(), ids = ?ids, "pending file analyses");
    }

    fn set_requery_pending(&self) {
        tracing::info!(queue = self.name, "requery requested");
    }
}

#[derive(Serialize)]
struct SyncReport<'a> {
    pass: &'a PassSummary,
    graph: &'a WorkspaceSummary,
}

#[derive(Serialize)]
struct WatchReport {
    status: ReconcilerStatus,
    peptides: usize,
    ms_data_files: usize,
    peptide_analyses: usize,
}

fn main() -> Result<()> {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("turnover=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let config = effective_config(&cli.global)?;

    match cli.command {
        Commands::Init {
            name,
            data_directory,
        } => {
            let store = open_store(&config)?;
            if let Some(name) = name {
                let id = store.set_workspace(&name, &data_directory)?;
                println!("{} workspace {} ({})", "ok".green().bold(), name.bold(), id);
            }
            println!(
                "{} {}",
                "initialized".green().bold(),
                store.path().display().to_string().bold()
            );
        }
        Commands::AddPeptide {
            sequence,
            protein,
            description,
            max_tracers,
            log,
        } => {
            let store = open_store(&config)?;
            let id = store.insert_peptide(PeptideRow {
                sequence,
                protein_name: protein,
                protein_description: description,
                max_tracer_count: max_tracers,
                ..PeptideRow::default()
            })?;
            if log {
                store.record_change(ChangeLogRow::peptide(id))?;
            }
            print_inserted("peptide", id);
        }
        Commands::AddFile {
            name,
            label,
            cohort,
            sample,
            time_point,
            log,
        } => {
            let store = open_store(&config)?;
            let id = store.insert_ms_data_file(MsDataFileRow {
                name,
                label,
                cohort,
                sample,
                time_point,
                ..MsDataFileRow::default()
            })?;
            if log {
                store.record_change(ChangeLogRow::ms_data_file(id))?;
            }
            print_inserted("ms_data_file", id);
        }
        Commands::AddAnalysis {
            peptide,
            min_charge,
            max_charge,
            note,
            log,
        } => {
            if min_charge > max_charge {
                bail!("--min-charge {min_charge} exceeds --max-charge {max_charge}");
            }
            let store = open_store(&config)?;
            let id = store.insert_peptide_analysis(PeptideAnalysisRow {
                peptide_id: peptide,
                note,
                min_charge,
                max_charge,
                ..PeptideAnalysisRow::default()
            })?;
            if log {
                store.record_change(ChangeLogRow::peptide_analysis(id))?;
            }
            print_inserted("peptide_analysis", id);
        }
        Commands::AddFileAnalysis {
            analysis,
            file,
            chromatograms,
            peaks,
        } => {
            let store = open_store(&config)?;
            let id = store.insert_file_analysis(PeptideFileAnalysisRow {
                peptide_analysis_id: analysis,
                ms_data_file_id: file,
                chromatogram_count: chromatograms,
                peak_count: peaks,
                ..PeptideFileAnalysisRow::default()
            })?;
            store.record_change(ChangeLogRow::peptide_analysis(analysis))?;
            print_inserted("peptide_file_analysis", id);
        }
        Commands::Touch {
            workspace,
            peptide,
            file,
            analysis,
        } => {
            let record = ChangeLogRow {
                workspace_id: workspace,
                peptide_id: peptide,
                ms_data_file_id: file,
                peptide_analysis_id: analysis,
                ..ChangeLogRow::default()
            };
            if record == ChangeLogRow::default() {
                bail!("touch needs at least one of --workspace, --peptide, --file, --analysis");
            }
            let store = open_store(&config)?;
            let id = store.record_change(record)?;
            print_inserted("change_log", id);
        }
        Commands::Sync { json } => {
            let reconciler = build_reconciler(&config)?;
            let summary = reconciler.sync().context("reconciliation failed")?;
            let graph = reconciler.workspace().summary();
            if json {
                let report = SyncReport {
                    pass: &summary,
                    graph: &graph,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_graph(&summary, &graph);
            }
        }
        Commands::Watch { seconds } => {
            let reconciler = build_reconciler(&config)?;
            reconciler.workspace().on_change(log_changes);
            reconciler.start()?;
            println!(
                "{} for {}s (poll every {}ms)",
                "Watching".green().bold(),
                seconds,
                config.reconciler.poll_interval_ms
            );
            thread::sleep(Duration::from_secs(seconds));
            reconciler.shutdown();

            let data = reconciler.workspace().acquire_read();
            let report = WatchReport {
                status: reconciler.status(),
                peptides: data.peptides.len(),
                ms_data_files: data.ms_data_files.len(),
                peptide_analyses: data.peptide_analyses.len(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Load { id, no_wait } => {
            let reconciler = build_reconciler(&config)?;
            let node = if no_wait {
                reconciler.try_load_one(id)?
            } else {
                tracing::info!(analysis = id, "waiting for analysis");
                Some(reconciler.load_one(id)?)
            };
            let Some(node) = node else {
                return Err(anyhow!("peptide analysis {id} does not exist"));
            };
            let summary: PeptideAnalysisSummary = node.read().summary();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

fn effective_config(args: &GlobalArgs) -> Result<TurnoverConfig> {
    let mut config = match &args.config {
        Some(path) => TurnoverConfig::load(path)?,
        None => TurnoverConfig::default(),
    };
    if let Some(database) = &args.database {
        config.store.database_path = database.clone();
    }
    if let Some(poll) = args.poll_interval_ms {
        config.reconciler.poll_interval_ms = poll;
    }
    if let Some(threshold) = args.requery_threshold {
        config.reconciler.requery_threshold = threshold;
    }
    if args.strict_race_check {
        config.reconciler.strict_race_check = true;
    }
    Ok(config)
}

fn open_store(config: &TurnoverConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.store).with_context(|| {
        format!(
            "failed to open store {}",
            config.store.database_path.display()
        )
    })
}

fn build_reconciler(config: &TurnoverConfig) -> Result<Reconciler> {
    let store = open_store(config)?;
    let workspace = Arc::new(Workspace::with_write_timeout(
        config.reconciler.write_lock_timeout(),
    ));
    Ok(Reconciler::with_collaborators(
        workspace,
        Arc::new(store),
        config.reconciler.clone(),
        Collaborators::new(
            Arc::new(LogQueue {
                name: "result_calculator",
            }),
            Arc::new(LogQueue {
                name: "chromatogram_generator",
            }),
        ),
    ))
}

fn log_changes(events: &[ChangeEvent]) {
    for event in events {
        match event {
            ChangeEvent::Added(key) => tracing::info!(entity = %key, "added"),
            ChangeEvent::Updated(key) => tracing::info!(entity = %key, "updated"),
            ChangeEvent::Removed(key) => tracing::info!(entity = %key, "removed"),
            ChangeEvent::WorkspaceReloaded => tracing::info!("workspace settings reloaded"),
        }
    }
}

fn print_inserted(table: &str, id: i64) {
    println!("{} {} {}", "inserted".green().bold(), table, id.to_string().bold());
}

fn print_graph(summary: &PassSummary, graph: &WorkspaceSummary) {
    let name = graph
        .info
        .as_ref()
        .map(|info| info.name.as_str())
        .unwrap_or("(unnamed)");
    println!("{} {}", "Workspace".green().bold(), name.bold());
    println!("  settings:          {}", graph.settings.len());
    println!("  modifications:     {}", graph.modifications.len());
    println!("  tracer defs:       {}", graph.tracer_defs.len());
    println!("  peptides:          {}", graph.peptides.len());
    println!("  ms data files:     {}", graph.ms_data_files.len());
    println!("  peptide analyses:  {}", graph.peptide_analyses.len());
    let file_analyses: usize = graph
        .peptide_analyses
        .values()
        .map(|analysis| analysis.file_analyses.len())
        .sum();
    println!("  file analyses:     {}", file_analyses);
    println!(
        "{} peptide {} / file {} / analysis {} / change log {}",
        "cursors".yellow().bold(),
        summary.cursors.peptide,
        summary.cursors.ms_data_file,
        summary.cursors.peptide_analysis,
        summary.cursors.change_log
    );
    if summary.pending_chromatograms + summary.pending_results > 0 {
        println!(
            "{} {} awaiting chromatograms, {} awaiting results",
            "pending".yellow().bold(),
            summary.pending_chromatograms,
            summary.pending_results
        );
    }
}
