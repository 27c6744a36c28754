use std::path::PathBuf;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::Layer, prelude::*, registry, EnvFilter};

/// keeps the non-blocking writers flushing, drop only once logging is done
pub struct Guard {
    _inner0: Option<WorkerGuard>,
    _inner1: WorkerGuard,
}

fn filter(default_directive: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(default_directive.parse()?)
        .from_env()?)
}

pub fn init_logging_no_file(default_directive: &str) -> Result<Guard> {
    let (stdout, guard1) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = Layer::new().with_writer(stdout).pretty();
    tracing::subscriber::set_global_default(
        registry()
            .with(filter(default_directive)?)
            .with(stdout_layer),
    )?;
    LogTracer::init()?;
    Ok(Guard {
        _inner0: None,
        _inner1: guard1,
    })
}

pub fn init_logging_with_file(log_dir: PathBuf, default_directive: &str) -> Result<Guard> {
    let appender = tracing_appender::rolling::hourly(log_dir, "clima.log");
    let (logfile, guard0) = tracing_appender::non_blocking(appender);
    let logfile_layer = Layer::new()
        .with_writer(logfile)
        .with_ansi(false)
        .compact();
    let (stdout, guard1) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = Layer::new().with_writer(stdout).pretty();
    tracing::subscriber::set_global_default(
        registry()
            .with(filter(default_directive)?)
            .with(logfile_layer)
            .with(stdout_layer),
    )?;
    LogTracer::init()?;
    Ok(Guard {
        _inner0: Some(guard0),
        _inner1: guard1,
    })
}
