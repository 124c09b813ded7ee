//! File logging for the add-on manager.
//!
//! Each process writes one `addons_<timestamp>.log` file into the log
//! directory. Files older than the retention window are removed at
//! startup.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default log retention in hours.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 24;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging configuration, the `[log]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log retention period in hours.
    pub retention_hours: u32,
    /// Log level (trace, debug, info, warn, error, off).
    pub level: String,
    /// Whether logging is enabled.
    pub enabled: bool,
    /// Directory for log files; defaults to `<runtime>/log`.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            level: DEFAULT_LOG_LEVEL.to_string(),
            enabled: true,
            dir: None,
        }
    }
}

impl LogConfig {
    /// Parses log level from string.
    #[must_use]
    pub fn parse_level(value: &str) -> String {
        match value.trim().to_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" | "warning" => "warn".to_string(),
            "error" => "error".to_string(),
            "off" | "none" | "disabled" => "off".to_string(),
            _ => DEFAULT_LOG_LEVEL.to_string(),
        }
    }

    /// Parses retention hours from string.
    #[must_use]
    pub fn parse_retention(value: &str) -> u32 {
        value.trim().parse().unwrap_or(DEFAULT_LOG_RETENTION_HOURS)
    }

    /// Normalises the level in place.
    pub fn normalize(&mut self) {
        self.level = Self::parse_level(&self.level);
    }
}

/// Returns a fresh log file path inside `dir`.
#[must_use]
pub fn log_file_path(dir: &Path) -> PathBuf {
    let now = chrono::Local::now();
    dir.join(format!("addons_{}.log", now.format("%Y-%m-%d_%H-%M-%S")))
}

/// Deletes `.log` files in `dir` older than `retention_hours`.
///
/// Returns how many files were removed.
pub fn cleanup_old_logs(dir: &Path, retention_hours: u32) -> io::Result<u32> {
    if !dir.exists() {
        return Ok(0);
    }

    let retention = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());

        if let Some(age) = age {
            if age > retention && fs::remove_file(&path).is_ok() {
                deleted += 1;
            }
        }
    }

    Ok(deleted)
}

/// Installs the global tracing subscriber writing into `dir`.
///
/// `RUST_LOG` overrides the configured level. Calling this twice is
/// harmless; the second subscriber is simply not installed.
pub fn init(config: &LogConfig, dir: &Path) -> io::Result<Option<PathBuf>> {
    let level = LogConfig::parse_level(&config.level);
    if !config.enabled || level == "off" {
        return Ok(None);
    }

    fs::create_dir_all(dir)?;
    let deleted = cleanup_old_logs(dir, config.retention_hours)?;

    let log_path = log_file_path(dir);
    let log_file = File::create(&log_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let file_layer = fmt::layer()
        .with_writer(log_file.with_max_level(tracing::Level::TRACE))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    if tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        // The layer and its file handle are dropped with the rejected registry.
        let _ = fs::remove_file(&log_path);
        return Ok(None);
    }

    tracing::info!("[ADDON-LOG] Logging initialized at {}", log_path.display());
    tracing::info!("[ADDON-LOG] Level: {}, retention: {}h", level, config.retention_hours);
    if deleted > 0 {
        tracing::info!("[ADDON-LOG] Cleaned up {} old log file(s)", deleted);
    }

    Ok(Some(log_path))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_level() {
        assert_eq!(LogConfig::parse_level("DEBUG"), "debug");
        assert_eq!(LogConfig::parse_level("warning"), "warn");
        assert_eq!(LogConfig::parse_level("disabled"), "off");
        assert_eq!(LogConfig::parse_level("loud"), DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_parse_retention() {
        assert_eq!(LogConfig::parse_retention("48"), 48);
        assert_eq!(LogConfig::parse_retention("soon"), DEFAULT_LOG_RETENTION_HOURS);
    }

    #[test]
    fn test_log_file_name() {
        let path = log_file_path(Path::new("/var/log"));
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("addons_"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_cleanup_keeps_fresh_and_non_log_files() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join("fresh.log"), "x").expect("write");
        fs::write(dir.path().join("notes.txt"), "x").expect("write");

        let deleted = cleanup_old_logs(dir.path(), 1).expect("cleanup");
        assert_eq!(deleted, 0);
        assert!(dir.path().join("fresh.log").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let dir = TempDir::new().expect("temp dir");
        assert_eq!(cleanup_old_logs(&dir.path().join("none"), 1).expect("ok"), 0);
    }

    #[test]
    fn test_disabled_logging_creates_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let config = LogConfig {
            enabled: false,
            ..LogConfig::default()
        };
        let logs = dir.path().join("logs");
        assert_eq!(init(&config, &logs).expect("init"), None);
        assert!(!logs.exists());
    }

    #[test]
    fn test_second_init_leaves_no_empty_log() {
        let first = TempDir::new().expect("temp dir");
        let second = TempDir::new().expect("temp dir");
        let config = LogConfig::default();

        let _ = init(&config, first.path()).expect("first init");
        assert_eq!(init(&config, second.path()).expect("second init"), None);

        let leftovers = fs::read_dir(second.path()).expect("read dir").count();
        assert_eq!(leftovers, 0);
    }
}
