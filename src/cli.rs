use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::AppContext;

#[derive(Debug, Clone, Parser)]
#[command(name = "construct-scan")]
#[command(about = "Inventory the packages, types and callables of Java and Python artifacts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Extraction directory for WAR, AAR and nested archives.
    #[arg(long, value_name = "DIR", global = true)]
    pub work_dir: Option<PathBuf>,

    /// Without --work-dir, keep extractions in the per-user cache directory.
    #[arg(long, global = true)]
    pub keep_extractions: bool,

    /// Archives below this directory are added to the classpath.
    #[arg(long, value_name = "DIR", global = true)]
    pub lib_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn, global = true)]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Analyze archives (.jar, .war, .aar, .whl, .egg, .tar.gz).
    Analyze {
        #[arg(value_name = "ARCHIVE", required = true)]
        paths: Vec<PathBuf>,

        #[arg(short = 'j', long, value_name = "N", default_value_t = 4)]
        pool_size: usize,

        /// Milliseconds; -1 waits indefinitely.
        #[arg(long, value_name = "MS", default_value_t = -1, allow_negative_numbers = true)]
        timeout_ms: i64,

        /// Jars a WAR should treat as part of WEB-INF/lib.
        #[arg(long, value_name = "DIR")]
        include_dir: Option<PathBuf>,

        /// Application coordinates, GROUP:ARTIFACT:VERSION.
        #[arg(long, value_name = "GAV", value_parser = parse_app_context)]
        app: Option<AppContext>,

        /// Include every construct in the output, not only counts.
        #[arg(long)]
        constructs: bool,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Print the constructs of one .java, .class or .py file.
    File {
        path: PathBuf,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub fn parse_app_context(raw: &str) -> Result<AppContext, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [group, artifact, version] if parts.iter().all(|p| !p.is_empty()) => Ok(AppContext {
            group: group.to_string(),
            artifact: artifact.to_string(),
            version: version.to_string(),
        }),
        _ => Err(format!("expected GROUP:ARTIFACT:VERSION, got '{raw}'")),
    }
}
