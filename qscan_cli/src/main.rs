#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `qscan`: plan and run quick scans on the configured device bench.

mod bench;
mod cli;
mod error_fmt;
mod scan;
mod sink;

use std::io;
use std::path::Path;

use clap::Parser;
use eyre::{Result, WrapErr};
use qscan_config::{Config, Logging};
use qscan_core::{CancellationToken, ScanControl, ScanError};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("warning: error reporter not installed: {e}");
    }
    if let Err(err) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match cli.cmd {
        Commands::Run {
            datafile,
            plotfile,
            no_header,
        } => {
            let token = CancellationToken::new();
            let handler_token = token.clone();
            if let Err(e) = ctrlc::set_handler(move || handler_token.interrupt()) {
                tracing::warn!(error = %e, "Ctrl-C handler not installed");
            }
            let args = scan::RunArgs {
                datafile,
                plotfile,
                no_header,
            };
            scan::run(&cfg, &args, ScanControl::new(token), cli.json)
        }
        Commands::Plan => scan::plan(&cfg, cli.json),
        Commands::SelfCheck => scan::self_check(&cfg, cli.json),
    }
}

/// Load and validate; every failure here is a configuration error.
fn load_config(path: &Path) -> Result<Config> {
    let cfg = qscan_config::load_file(path)
        .and_then(|c| c.validate().map(|()| c))
        .map_err(|e| eyre::Report::new(ScanError::Configuration(format!("{e:#}"))))?;
    Ok(cfg)
}

fn init_tracing(json: bool, cli_level: Option<&str>, logging: &Logging) -> Result<()> {
    let level = cli_level
        .or(logging.level.as_deref())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("invalid log level '{level}'"))?;

    let console = if json {
        fmt::layer().json().with_writer(io::stderr).boxed()
    } else {
        fmt::layer().with_writer(io::stderr).with_target(false).boxed()
    };

    let file = match &logging.file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let prefix = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| eyre::eyre!("logging.file has no file name"))?;
            let rotation = match logging.rotation.as_deref() {
                Some("daily") => Rotation::DAILY,
                Some("hourly") => Rotation::HOURLY,
                _ => Rotation::NEVER,
            };
            let appender = RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(prefix)
                .build(dir)
                .wrap_err("open log file")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}
