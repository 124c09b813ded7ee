//! Canonical filesystem locations of a site.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::addons::OVERLAY_DIR;

/// The `[paths]` table of the config file.
///
/// Only `base` is required; everything else defaults relative to it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathsConfig {
    /// Application root; `app` overlays land here.
    pub base: PathBuf,
    /// Directory holding one subdirectory per installed addon.
    #[serde(default)]
    pub addons: Option<PathBuf>,
    /// Runtime directory for scratch files, state and caches.
    #[serde(default)]
    pub runtime: Option<PathBuf>,
    /// Template root holding one directory per module.
    #[serde(default)]
    pub templates: Option<PathBuf>,
    /// Web root.
    #[serde(default)]
    pub public: Option<PathBuf>,
}

/// Resolved site layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitePaths {
    base: PathBuf,
    addons: PathBuf,
    runtime: PathBuf,
    templates: PathBuf,
    public: PathBuf,
}

impl SitePaths {
    /// Uses the conventional layout under `base`:
    /// `addons/`, `runtime/`, `template/`, `public/`.
    #[must_use]
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            addons: base.join("addons"),
            runtime: base.join("runtime"),
            templates: base.join("template"),
            public: base.join("public"),
        }
    }

    /// Resolves a `[paths]` table; relative entries are taken from `base`.
    #[must_use]
    pub fn from_config(config: &PathsConfig) -> Self {
        let defaults = Self::new(&config.base);
        let resolve = |value: &Option<PathBuf>, fallback: PathBuf| match value {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => config.base.join(p),
            None => fallback,
        };

        Self {
            addons: resolve(&config.addons, defaults.addons.clone()),
            runtime: resolve(&config.runtime, defaults.runtime.clone()),
            templates: resolve(&config.templates, defaults.templates.clone()),
            public: resolve(&config.public, defaults.public.clone()),
            base: defaults.base,
        }
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    #[must_use]
    pub fn addons(&self) -> &Path {
        &self.addons
    }

    #[must_use]
    pub fn runtime(&self) -> &Path {
        &self.runtime
    }

    #[must_use]
    pub fn templates(&self) -> &Path {
        &self.templates
    }

    #[must_use]
    pub fn public(&self) -> &Path {
        &self.public
    }

    /// Root directory of one addon.
    #[must_use]
    pub fn addon_root(&self, name: &str) -> PathBuf {
        self.addons.join(name)
    }

    /// The `install/` overlay of one addon.
    #[must_use]
    pub fn addon_overlay(&self, name: &str) -> PathBuf {
        self.addon_root(name).join(OVERLAY_DIR)
    }

    /// Download and extraction scratch directory.
    #[must_use]
    pub fn scratch(&self) -> PathBuf {
        self.runtime.join("cloud")
    }

    /// Template directory of a module.
    #[must_use]
    pub fn module_templates(&self, module: &str) -> PathBuf {
        self.templates.join(module)
    }

    /// Static asset directory of a module.
    #[must_use]
    pub fn module_static(&self, module: &str) -> PathBuf {
        self.public.join("static").join(module)
    }

    /// Active theme directory of a module.
    #[must_use]
    pub fn theme_dir(&self, module: &str, theme: &str) -> PathBuf {
        self.module_templates(module).join(theme)
    }

    /// Shared directory receiving every addon's `static` overlay.
    #[must_use]
    pub fn addons_static(&self) -> PathBuf {
        self.public.join("static").join("addons")
    }

    /// Activation state file.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.runtime.join("addons_state.toml")
    }

    /// Token cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.runtime.join("cache")
    }

    /// Default log directory.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.runtime.join("log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let paths = SitePaths::new(Path::new("/srv/site"));
        assert_eq!(paths.addon_overlay("demo"), PathBuf::from("/srv/site/addons/demo/install"));
        assert_eq!(paths.scratch(), PathBuf::from("/srv/site/runtime/cloud"));
        assert_eq!(
            paths.addons_static(),
            PathBuf::from("/srv/site/public/static/addons")
        );
        assert_eq!(
            paths.theme_dir("index", "default"),
            PathBuf::from("/srv/site/template/index/default")
        );
    }

    #[test]
    fn test_config_overrides() {
        let config = PathsConfig {
            base: PathBuf::from("/srv/site"),
            addons: Some(PathBuf::from("plugins")),
            runtime: Some(PathBuf::from("/tmp/rt")),
            templates: None,
            public: None,
        };
        let paths = SitePaths::from_config(&config);
        assert_eq!(paths.addons(), Path::new("/srv/site/plugins"));
        assert_eq!(paths.runtime(), Path::new("/tmp/rt"));
        assert_eq!(paths.public(), Path::new("/srv/site/public"));
        assert_eq!(paths.module_static("blog"), PathBuf::from("/srv/site/public/static/blog"));
    }
}
