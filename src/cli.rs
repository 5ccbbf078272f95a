//! CLI argument parsing for sqlprof

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Output format for the session report
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text dump (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "sqlprof")]
#[command(version)]
#[command(about = "SQL query profiler with call-site attribution", long_about = None)]
pub struct Cli {
    /// Recorded session capture to replay (JSON)
    #[arg(value_name = "CAPTURE")]
    pub capture: PathBuf,

    /// Number of entries per ranking section
    #[arg(short = 'n', long = "top", value_name = "N", default_value = "20")]
    pub top: usize,

    /// Report format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Count only stack frames under this directory (defaults to the
    /// current working directory)
    #[arg(long = "app-root", value_name = "DIR")]
    pub app_root: Option<PathBuf>,

    /// Log per-query diagnostics to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
