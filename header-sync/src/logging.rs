//! Tracing subscriber setup with optional per-run log files.
//!
//! Each run writes to `run.log`. On startup the previous `run.log` is archived
//! as `header-sync.<timestamp>.log` and archives beyond the configured count
//! are pruned, oldest first.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{LoggingError, LoggingResult};

const ARCHIVE_PREFIX: &str = "header-sync.";
const ARCHIVE_SUFFIX: &str = ".log";
const ACTIVE_LOG_NAME: &str = "run.log";
const ARCHIVE_TIME_FORMAT: &str = "%Y-%m-%d.%H%M%S";

/// Keeps the non-blocking file writer alive. Buffered lines are flushed when
/// it is dropped.
#[derive(Debug)]
pub struct LoggingGuard {
    file_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Whether a log file is being written.
    pub fn has_file_output(&self) -> bool {
        self.file_guard.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Explicit level. `None` reads `RUST_LOG`, then falls back to INFO.
    pub level: Option<LevelFilter>,
    /// Write to stderr.
    pub console: bool,
    pub file: Option<LogFileConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            console: true,
            file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogFileConfig {
    pub log_dir: PathBuf,
    /// Archived logs kept besides the active one.
    pub max_files: usize,
}

/// Console logging at `level`.
pub fn init_console_logging(level: LevelFilter) -> LoggingResult<LoggingGuard> {
    init_logging(LoggingConfig {
        level: Some(level),
        console: true,
        file: None,
    })
}

/// Install the global subscriber described by `config`.
///
/// With neither console nor file output nothing is installed and tracing
/// macros are no-ops. Fails if a global subscriber already exists or the log
/// directory cannot be prepared.
pub fn init_logging(config: LoggingConfig) -> LoggingResult<LoggingGuard> {
    if !config.console && config.file.is_none() {
        return Ok(LoggingGuard {
            file_guard: None,
        });
    }

    let filter = build_filter(config.level);

    let (file_layer, file_guard) = match &config.file {
        Some(file_config) => {
            let (writer, guard) = open_run_log(file_config)?;
            let layer = fmt::layer().with_target(true).with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let console_layer = config.console.then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))?;

    Ok(LoggingGuard {
        file_guard,
    })
}

fn build_filter(level: Option<LevelFilter>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    }
}

fn open_run_log(config: &LogFileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.log_dir)?;
    archive_run_log(&config.log_dir)?;
    prune_archives(&config.log_dir, config.max_files)?;

    let file = File::create(config.log_dir.join(ACTIVE_LOG_NAME))?;
    Ok(tracing_appender::non_blocking(file))
}

fn archive_name(stamp: &DateTime<Local>, collision: Option<u32>) -> String {
    let stamp = stamp.format(ARCHIVE_TIME_FORMAT);
    match collision {
        None => format!("{}{}{}", ARCHIVE_PREFIX, stamp, ARCHIVE_SUFFIX),
        Some(n) => format!("{}{}-{}{}", ARCHIVE_PREFIX, stamp, n, ARCHIVE_SUFFIX),
    }
}

/// Rename an existing `run.log` after its last modification time.
/// Returns the archive path, if a log was archived.
fn archive_run_log(log_dir: &Path) -> LoggingResult<Option<PathBuf>> {
    let active = log_dir.join(ACTIVE_LOG_NAME);
    if !active.exists() {
        return Ok(None);
    }

    let stamp = fs::metadata(&active)
        .and_then(|meta| meta.modified())
        .map(DateTime::<Local>::from)
        .unwrap_or_else(|_| Local::now());

    let target = std::iter::once(None)
        .chain((1..=999).map(Some))
        .map(|collision| log_dir.join(archive_name(&stamp, collision)))
        .find(|path| !path.exists())
        .ok_or_else(|| {
            LoggingError::RotationFailed(format!("no free archive name for {}", stamp))
        })?;

    fs::rename(&active, &target).map_err(|e| LoggingError::RotationFailed(e.to_string()))?;
    Ok(Some(target))
}

fn is_archive(name: &str) -> bool {
    name.starts_with(ARCHIVE_PREFIX) && name.ends_with(ARCHIVE_SUFFIX)
}

/// Delete the oldest archives until at most `keep` remain. Archive names embed
/// their timestamp, so name order is age order.
fn prune_archives(log_dir: &Path, keep: usize) -> LoggingResult<usize> {
    let entries = fs::read_dir(log_dir)
        .map_err(|e| LoggingError::RotationFailed(format!("failed to read log dir: {}", e)))?;
    let mut archives: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_str().is_some_and(is_archive))
        .map(|entry| entry.path())
        .collect();

    if archives.len() <= keep {
        return Ok(0);
    }
    archives.sort();

    let excess = archives.len() - keep;
    let mut removed = 0;
    for path in archives.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn archives_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| is_archive(name))
            .collect();
        names.sort();
        names
    }

    fn touch_archive(dir: &Path, day: u32) {
        let name = format!("{}2026-01-{:02}.120000{}", ARCHIVE_PREFIX, day, ARCHIVE_SUFFIX);
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_archive_without_run_log_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(archive_run_log(temp_dir.path()).unwrap(), None);
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_run_log_is_archived() {
        let temp_dir = TempDir::new().unwrap();
        let active = temp_dir.path().join(ACTIVE_LOG_NAME);
        let mut file = File::create(&active).unwrap();
        writeln!(file, "INFO previous run").unwrap();
        drop(file);

        let archived = archive_run_log(temp_dir.path()).unwrap().unwrap();
        assert!(!active.exists());
        assert_eq!(fs::read_to_string(&archived).unwrap(), "INFO previous run\n");
        assert_eq!(archives_in(temp_dir.path()).len(), 1);
    }

    #[test]
    fn test_archive_name_collision_gets_suffix() {
        let temp_dir = TempDir::new().unwrap();
        for _ in 0..2 {
            File::create(temp_dir.path().join(ACTIVE_LOG_NAME)).unwrap();
            archive_run_log(temp_dir.path()).unwrap();
        }
        // Both runs may share a timestamp; neither archive is lost.
        assert_eq!(archives_in(temp_dir.path()).len(), 2);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let temp_dir = TempDir::new().unwrap();
        for day in 1..=6 {
            touch_archive(temp_dir.path(), day);
        }
        File::create(temp_dir.path().join(ACTIVE_LOG_NAME)).unwrap();

        assert_eq!(prune_archives(temp_dir.path(), 2).unwrap(), 4);

        let remaining = archives_in(temp_dir.path());
        assert_eq!(remaining.len(), 2);
        assert!(remaining[0].contains("2026-01-05"));
        assert!(remaining[1].contains("2026-01-06"));
        assert!(temp_dir.path().join(ACTIVE_LOG_NAME).exists());
    }

    #[test]
    fn test_prune_under_limit_and_zero() {
        let temp_dir = TempDir::new().unwrap();
        for day in 1..=3 {
            touch_archive(temp_dir.path(), day);
        }
        assert_eq!(prune_archives(temp_dir.path(), 7).unwrap(), 0);
        assert_eq!(prune_archives(temp_dir.path(), 0).unwrap(), 3);
        assert!(archives_in(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_no_output_installs_nothing() {
        let guard = init_logging(LoggingConfig {
            level: Some(LevelFilter::DEBUG),
            console: false,
            file: None,
        })
        .unwrap();
        assert!(!guard.has_file_output());
    }
}
