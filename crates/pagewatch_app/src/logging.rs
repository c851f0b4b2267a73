//! Logger setup for the `pagewatch` binary.
//!
//! File output goes to `<dir>/<YYYY-MM-DD>-logs.log`, appended across runs.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::LevelFilter;
use pagewatch_engine::ensure_dir;
use serde::{Deserialize, Serialize};
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use crate::config::LogConfig;

/// Destination for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogDestination {
    /// Write to the daily log file.
    File,
    /// Write to the terminal.
    Terminal,
    /// Write to both file and terminal.
    Both,
}

/// Initialize the logger from configuration.
///
/// Returns the log file path when one was opened. A file that cannot be
/// opened is reported on stderr and skipped.
pub fn initialize(settings: &LogConfig) -> Option<PathBuf> {
    let level = watch_logging::parse_level(&settings.level);
    let config = build_config();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    if matches!(
        settings.destination,
        LogDestination::Terminal | LogDestination::Both
    ) {
        loggers.push(TermLogger::new(
            level,
            config.clone(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));
    }

    let mut opened = None;
    if matches!(
        settings.destination,
        LogDestination::File | LogDestination::Both
    ) {
        let path = daily_log_path(&settings.dir, &Local::now().format("%Y-%m-%d").to_string());
        if let Some(file_logger) = create_file_logger(&path, level, config) {
            loggers.push(file_logger);
            opened = Some(path);
        }
    }

    if loggers.is_empty() {
        return None;
    }
    let _ = CombinedLogger::init(loggers);
    opened
}

fn build_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .build()
}

fn daily_log_path(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("{date}-logs.log"))
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        ensure_dir(dir).map_err(std::io::Error::other)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn create_file_logger(
    path: &Path,
    level: LevelFilter,
    config: Config,
) -> Option<Box<WriteLogger<File>>> {
    match open_append(path) {
        Ok(file) => Some(WriteLogger::new(level, config, file)),
        Err(err) => {
            eprintln!("Warning: Could not open log file at {:?}: {}", path, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn log_file_is_named_by_day() {
        assert_eq!(
            daily_log_path(Path::new("logs"), "2024-03-09"),
            PathBuf::from("logs/2024-03-09-logs.log")
        );
    }

    #[test]
    fn log_file_is_appended_not_truncated() {
        let dir = TempDir::new().unwrap();
        let path = daily_log_path(&dir.path().join("nested"), "2024-03-09");

        writeln!(open_append(&path).unwrap(), "first").unwrap();
        writeln!(open_append(&path).unwrap(), "second").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }
}
