//! Diagnostic logging setup.
//!
//! Console logs go to stderr, filtered by `RUST_LOG` or the `-v` count. When
//! `[logging] dir` is set a daily log file is written as well, filtered by
//! `[logging] level`.

use std::path::Path;

use tracing::metadata::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::settings::LoggingSection;

const LOG_FILE_PREFIX: &str = "launch-shop.log";

/// Keeps the non-blocking file writer flushing until dropped.
pub struct LoggingGuard {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn level_from_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

/// Install the global subscriber. Safe to call once per process; later calls
/// are ignored.
pub fn init(verbose: u8, json: bool, logging: &LoggingSection, project_dir: &Path) -> LoggingGuard {
    let console_filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbose).into())
        .from_env_lossy();

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = if json || logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(verbose >= 2)
            .with_filter(console_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(verbose >= 2)
            .with_filter(console_filter)
            .boxed()
    };
    layers.push(console);

    let mut guard = None;
    let mut file_error = None;
    if let Some(dir) = logging.dir.as_ref() {
        let dir = if dir.is_absolute() {
            dir.clone()
        } else {
            project_dir.join(dir)
        };
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
                let (writer, worker) = tracing_appender::non_blocking(appender);
                let file_filter = EnvFilter::try_new(&logging.level)
                    .unwrap_or_else(|_| EnvFilter::new("info"));
                layers.push(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_filter(file_filter)
                        .boxed(),
                );
                guard = Some(worker);
            }
            Err(e) => file_error = Some(format!("log dir init failed for {}: {}", dir.display(), e)),
        }
    }

    let _ = Registry::default().with(layers).try_init();

    if let Some(error) = file_error {
        tracing::warn!("{}", error);
    }
    LoggingGuard { _guard: guard }
}
