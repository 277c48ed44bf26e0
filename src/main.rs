use anyhow::{Context, Result};
use clap::Parser;
use construct_scan::analyzer::{ArchiveAnalyzer, ArchiveKind, file_analyzer_for};
use construct_scan::cli::{Cli, Commands, LogLevel, OutputFormat};
use construct_scan::config::{AnalysisConfig, AppContext, default_work_dir};
use construct_scan::construct::{ConstructId, ConstructMap};
use construct_scan::error::OrchestratorError;
use construct_scan::library::LibraryId;
use construct_scan::orchestrator::{Orchestrator, TaskState, timeout_from_millis};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    match cli.command.clone() {
        Commands::Analyze {
            paths,
            pool_size,
            timeout_ms,
            include_dir,
            app,
            constructs,
            format,
        } => {
            let config = resolve_config(&cli, include_dir, app)?;
            let report = analyze(config, paths, pool_size, timeout_ms, constructs)?;
            write_report(&report, format)?;
            if let Some(timeout) = &report.timeout {
                anyhow::bail!("{timeout}");
            }
        }
        Commands::File { path, format } => print_file(&path, format)?,
    }

    Ok(())
}

fn init_tracing(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn resolve_config(
    cli: &Cli,
    include_dir: Option<PathBuf>,
    app: Option<AppContext>,
) -> Result<Arc<AnalysisConfig>> {
    let mut config = AnalysisConfig::from_env().context("invalid CONSTRUCT_SCAN_* setting")?;
    if let Some(dir) = cli.work_dir.clone() {
        config.work_dir = Some(dir);
    }
    if config.work_dir.is_none() && cli.keep_extractions {
        config.work_dir = default_work_dir();
    }
    if let Some(dir) = cli.lib_dir.clone() {
        config.lib_dir = Some(dir);
    }
    config.include_dir = include_dir;
    config.app_context = app;
    Ok(Arc::new(config))
}

#[derive(Debug, Serialize)]
struct ConstructEntry<'a> {
    #[serde(flatten)]
    id: &'a ConstructId,
    #[serde(skip_serializing_if = "str::is_empty")]
    body: &'a str,
}

fn entries(map: &ConstructMap) -> Vec<ConstructEntry<'_>> {
    map.values()
        .map(|c| ConstructEntry {
            id: &c.id,
            body: &c.body,
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct ArchiveReport {
    path: String,
    kind: ArchiveKind,
    parent: Option<String>,
    digest: Option<String>,
    library: Option<LibraryId>,
    bundled: Vec<LibraryId>,
    construct_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    constructs: Option<Vec<ReportedConstruct>>,
}

#[derive(Debug, Serialize)]
struct ReportedConstruct {
    lang: String,
    #[serde(rename = "type")]
    kind: &'static str,
    qname: String,
}

#[derive(Debug, Serialize)]
struct AnalyzeReport {
    elapsed_ms: u64,
    archives: Vec<ArchiveReport>,
    tasks: Vec<TaskReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
}

#[derive(Debug, Serialize)]
struct TaskReport {
    path: String,
    state: TaskState,
}

fn analyze(
    config: Arc<AnalysisConfig>,
    paths: Vec<PathBuf>,
    pool_size: usize,
    timeout_ms: i64,
    with_constructs: bool,
) -> Result<AnalyzeReport> {
    let started = Instant::now();
    let mut orchestrator = Orchestrator::new(config, pool_size, timeout_from_millis(timeout_ms));
    let timeout = match orchestrator.start_analysis(paths.into_iter().map(|p| (p, None)).collect(), None) {
        Ok(()) => None,
        Err(e @ OrchestratorError::Timeout { .. }) => Some(e.to_string()),
        Err(e) => return Err(e).context("archive analysis could not run"),
    };

    let archives = orchestrator
        .analyzers()
        .iter()
        .map(|a| archive_report(a.as_ref(), with_constructs))
        .collect();
    let tasks = orchestrator
        .task_states()
        .into_iter()
        .map(|(path, state)| TaskReport {
            path: path.display().to_string(),
            state,
        })
        .collect();

    Ok(AnalyzeReport {
        elapsed_ms: started.elapsed().as_millis() as u64,
        archives,
        tasks,
        timeout,
    })
}

fn archive_report(analyzer: &dyn ArchiveAnalyzer, with_constructs: bool) -> ArchiveReport {
    let constructs = analyzer.constructs().ok();
    ArchiveReport {
        path: analyzer.path().display().to_string(),
        kind: analyzer.kind(),
        parent: analyzer.parent().map(|p| p.display().to_string()),
        digest: analyzer.digest().ok().map(str::to_string),
        library: analyzer.library_id().cloned(),
        bundled: analyzer
            .bundled_libraries()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default(),
        construct_count: constructs.map(|c| c.len()).unwrap_or(0),
        constructs: with_constructs.then(|| {
            constructs
                .map(|map| {
                    map.keys()
                        .map(|id| ReportedConstruct {
                            lang: id.language().to_string(),
                            kind: id.kind().tag(),
                            qname: id.qualified_name(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }),
    }
}

fn write_report(report: &AnalyzeReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            for a in &report.archives {
                println!(
                    "{:?}\t{}\t{}\t{} constructs",
                    a.kind,
                    a.path,
                    a.digest.as_deref().unwrap_or("-"),
                    a.construct_count
                );
                for c in a.constructs.iter().flatten() {
                    println!("  {} {}", c.kind, c.qname);
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct FileResult<'a> {
    path: String,
    constructs: Vec<ConstructEntry<'a>>,
}

fn print_file(path: &Path, format: OutputFormat) -> Result<()> {
    let analyzer = file_analyzer_for(path)
        .with_context(|| format!("unsupported file type: {}", path.display()))?;
    let map = analyzer
        .constructs()
        .with_context(|| format!("cannot analyze {}", path.display()))?;

    match format {
        OutputFormat::Json => {
            let result = FileResult {
                path: path.display().to_string(),
                constructs: entries(map),
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            for id in map.keys() {
                println!("{} {}", id.kind().tag(), id.qualified_name());
            }
        }
    }
    Ok(())
}
