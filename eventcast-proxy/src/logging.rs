//! Logging system with file output and log rotation.
//!
//! Call sites use the `log` macros; they are bridged into `tracing` and
//! written both to the console and to a daily-rotated file. Files older than
//! the retention window are removed at startup.

use chrono::Local;
use std::fs;
use std::io;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Base name of the rotated log files.
const LOG_FILE_NAME: &str = "eventcast.log";

/// Initialize console and file logging.
///
/// # Arguments
/// * `log_dir` - Directory where log files will be stored
/// * `retention_days` - Number of days to keep log files
/// * `verbose` - Enable debug-level logging
/// * `level` - Filter directive from the config file, e.g. `info,eventcast=debug`
///
/// `RUST_LOG` takes precedence over both `verbose` and `level`.
pub fn init_logging(
    log_dir: &Path,
    retention_days: u64,
    verbose: bool,
    level: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(log_dir)?;
    clean_old_logs(log_dir, retention_days)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Flushes on drop; keep it for the life of the process
    let _ = Box::leak(Box::new(guard));

    let default_level = if verbose { "debug" } else { level.unwrap_or("info") };
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(io::stdout)
                .with_target(true)
                .with_level(true)
                .with_timer(LocalTimeTimer),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_timer(LocalTimeTimer),
        );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set default subscriber: {}", e))?;

    // Bridge log:: macros to tracing
    tracing_log::LogTracer::init().map_err(|e| format!("Failed to initialize LogTracer: {}", e))?;

    Ok(())
}

/// Remove log files last modified before the retention window.
fn clean_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();

        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_NAME));
        if !path.is_file() || !is_log {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let modified: chrono::DateTime<Local> = modified.into();
        if modified < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
            }
        }
    }

    Ok(removed)
}

/// Local time formatting for log lines.
#[derive(Debug, Clone, Copy)]
struct LocalTimeTimer;

impl fmt::time::FormatTime for LocalTimeTimer {
    fn format_time(&self, w: &mut fmt::format::Writer) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}
