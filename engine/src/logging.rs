use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

use tracing_appender::{
    non_blocking::{self, WorkerGuard},
    rolling::RollingFileAppender,
};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt, EnvFilter};

use crate::utils::os::app_support_dir;

static _GUARD: OnceCell<WorkerGuard> = OnceCell::new(); // keep writer alive

const LOG_FILE_PREFIX: &str = "app.log";
const KEEP_LOGS: usize = 10;

pub fn log_dir() -> PathBuf {
    app_support_dir().join("logs")
}

/// Initialize global subscriber. Call once at app start.
///
/// The console layer honours `RUST_LOG` (default `info`). With `file_enabled`
/// a second layer writes daily-rotated files under [`log_dir`].
pub fn init(file_enabled: bool) {
    // Always log to stderr so stdout stays clean for command output.
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_ansi(true)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let file_layer = if file_enabled {
        let dir = log_dir();
        let _ = std::fs::create_dir_all(&dir);

        // Daily rotation; current file is app.log.<date>.
        let file_appender: RollingFileAppender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
        let (nb_writer, guard): (non_blocking::NonBlocking, WorkerGuard) =
            tracing_appender::non_blocking(file_appender);
        let _ = _GUARD.set(guard);

        prune_old_logs(&dir, KEEP_LOGS);

        // File layer (no ANSI, include target + line for debugging).
        Some(
            fmt::layer()
                .with_writer(nb_writer)
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_line_number(true)
                .with_filter(EnvFilter::new("debug")),
        )
    } else {
        None
    };

    // try_init: a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(console)
        .try_init();
}

/// Keep the newest `keep` rotated logs in `dir` and remove the rest.
pub fn prune_old_logs(dir: &Path, keep: usize) {
    use std::fs;

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let mut files: Vec<_> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| e.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .collect();

    // oldest first; ties (same mtime) fall back to name, which embeds the date
    files.sort_by_key(|e| (e.metadata().and_then(|m| m.modified()).ok(), e.file_name()));

    if files.len() > keep {
        let excess = files.len() - keep;
        for e in files.iter().take(excess) {
            let _ = fs::remove_file(e.path());
        }
    }
}
