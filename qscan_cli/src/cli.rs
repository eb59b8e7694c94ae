//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "qscan", version, about = "Quick (on-the-fly) scan driver")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/qscan.toml")]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured quick scan and write the samples
    Run {
        /// Datafile path (overrides [output].datafile; "-" for stdout)
        #[arg(long, value_name = "FILE")]
        datafile: Option<PathBuf>,
        /// Plot-row file (overrides [output].plotfile)
        #[arg(long, value_name = "FILE")]
        plotfile: Option<PathBuf>,
        /// Omit the column header line
        #[arg(long, action = ArgAction::SetTrue)]
        no_header: bool,
    },
    /// Plan the scan and print the motion profiles without moving anything
    Plan,
    /// Quick health check: every bench device answers
    SelfCheck,
}
