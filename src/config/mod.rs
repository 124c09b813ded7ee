//! Configuration for the add-on manager.
//!
//! Loaded from `~/.cms-addons/addons.toml` by default:
//!
//! ```toml
//! api_url = "https://market.example.com/api/"
//! host_app_version = "2.1.0"
//! request_timeout_secs = 30
//!
//! [paths]
//! base = "/srv/site"
//!
//! [themes]
//! index = "default"
//!
//! [log]
//! level = "debug"
//! ```

pub mod paths;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub use paths::{PathsConfig, SitePaths};

use crate::logging::LogConfig;

/// Environment variable overriding `api_url`.
pub const ENV_API_URL: &str = "CMS_ADDONS_API_URL";

/// Environment variable overriding `paths.base`.
pub const ENV_BASE_PATH: &str = "CMS_ADDONS_BASE_PATH";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not determine home directory")]
    NoHome,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManagerConfig {
    /// Marketplace API base URL.
    #[serde(default)]
    pub api_url: String,
    /// Version of the host application, sent with downloads.
    #[serde(default)]
    pub host_app_version: String,
    /// HTTP timeout.
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// Site layout.
    pub paths: PathsConfig,
    /// Active theme per module. Template overlays only target these modules.
    #[serde(default)]
    pub themes: BTreeMap<String, String>,
    /// Logging.
    #[serde(default)]
    pub log: LogConfig,
}

impl ManagerConfig {
    /// Minimal configuration for a site rooted at `base`.
    #[must_use]
    pub fn for_site(base: &Path, api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            host_app_version: String::new(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            paths: PathsConfig {
                base: base.to_path_buf(),
                addons: None,
                runtime: None,
                templates: None,
                public: None,
            },
            themes: BTreeMap::new(),
            log: LogConfig::default(),
        }
    }

    /// Default config location: `~/.cms-addons/addons.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".cms-addons").join("addons.toml"))
            .ok_or(ConfigError::NoHome)
    }

    /// Loads a config file and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parses TOML text without touching the environment.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.log.normalize();
        Ok(config)
    }

    /// Applies `CMS_ADDONS_API_URL` and `CMS_ADDONS_BASE_PATH`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_API_URL).ok(),
            std::env::var(ENV_BASE_PATH).ok(),
        );
    }

    fn apply_overrides(&mut self, api_url: Option<String>, base: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_url = url;
        }
        if let Some(base) = base.filter(|b| !b.trim().is_empty()) {
            self.paths.base = PathBuf::from(base);
        }
    }

    /// Resolved site layout.
    #[must_use]
    pub fn site_paths(&self) -> SitePaths {
        SitePaths::from_config(&self.paths)
    }

    /// Log directory, `<runtime>/log` unless configured.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.log
            .dir
            .clone()
            .unwrap_or_else(|| self.site_paths().log_dir())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
api_url = "https://market.example.com/api/"
host_app_version = "2.1.0"

[paths]
base = "/srv/site"
addons = "plugins"

[themes]
index = "default"
blog = "dark"

[log]
level = "WARNING"
retention_hours = 6
"#;

    #[test]
    fn test_parse_sample() {
        let config = ManagerConfig::from_toml_str(SAMPLE).expect("parse");
        assert_eq!(config.api_url, "https://market.example.com/api/");
        assert_eq!(config.request_timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.themes.get("blog").map(String::as_str), Some("dark"));
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.log.retention_hours, 6);
        assert_eq!(
            config.site_paths().addon_root("demo"),
            PathBuf::from("/srv/site/plugins/demo")
        );
        assert_eq!(config.log_dir(), PathBuf::from("/srv/site/runtime/log"));
    }

    #[test]
    fn test_missing_base_is_an_error() {
        let err = ManagerConfig::from_toml_str("api_url = \"x\"\n[paths]\n").expect_err("no base");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overrides() {
        let mut config = ManagerConfig::from_toml_str(SAMPLE).expect("parse");
        config.apply_overrides(Some("http://localhost:9000".to_string()), Some(String::new()));
        assert_eq!(config.api_url, "http://localhost:9000");
        assert_eq!(config.paths.base, PathBuf::from("/srv/site"));

        config.apply_overrides(None, Some("/opt/site".to_string()));
        assert_eq!(config.paths.base, PathBuf::from("/opt/site"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("addons.toml");
        fs::write(&path, SAMPLE).expect("write");
        let config = ManagerConfig::load(&path).expect("load");
        assert_eq!(config.host_app_version, "2.1.0");

        let err = ManagerConfig::load(&dir.path().join("missing.toml")).expect_err("missing");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
