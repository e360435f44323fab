//! Rolling log files: the file sink layer and its retention sweep.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};

/// Writer for a daily-rotated file `<dir>/<prefix>.YYYY-MM-DD`.
///
/// Lines are handed to a background thread; keep the guard alive for the
/// life of the process or buffered lines are lost on exit.
pub fn file_writer(
    dir: &Path,
    prefix: &str,
) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Delete files in `dir` starting with `prefix` whose last modification is
/// more than `retention_days` ago. Returns how many were removed.
///
/// A missing directory is not an error. Files that cannot be inspected or
/// removed are logged and skipped.
pub fn prune_old_logs(dir: &Path, prefix: &str, retention_days: u32) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read log directory");
            return 0;
        }
    };

    let max_age = Duration::from_secs(u64::from(retention_days) * 24 * 3600);
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        let matches_prefix = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(prefix));
        if !matches_prefix {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| {
            if m.is_file() {
                m.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(modified)) => modified,
            Ok(None) => continue,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Cannot stat log file");
                continue;
            }
        };

        // Future mtimes count as fresh
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(file = %path.display(), "Removed old log file");
                removed += 1;
            }
            Err(e) => warn!(file = %path.display(), error = %e, "Failed to remove old log file"),
        }
    }

    if removed > 0 {
        info!(removed = removed, days = retention_days, "Pruned old log files");
    }
    removed
}
