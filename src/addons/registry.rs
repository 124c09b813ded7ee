//! Scan of what is installed on the site.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::warn;

use super::dir::{self, FsError};
use super::manifest::{self, PackageDescriptor};
use super::types::{MANIFEST_FILE, PackageKind};
use crate::config::SitePaths;

/// Preview image looked up in a template's static tree.
pub const PREVIEW_FILE: &str = "preview.jpg";

/// An installed addon or module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub descriptor: PackageDescriptor,
    pub root: PathBuf,
}

/// A template directory under a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTemplate {
    pub module: String,
    pub name: String,
    pub root: PathBuf,
    /// Parsed `info.ini`, when present and valid.
    pub descriptor: Option<PackageDescriptor>,
    /// `<public>/static/<module>/<name>/preview.jpg`, when it exists.
    pub preview: Option<PathBuf>,
}

/// Read-only view over the installed packages of a site.
#[derive(Debug, Clone, Copy)]
pub struct LocalRegistry<'a> {
    paths: &'a SitePaths,
}

impl<'a> LocalRegistry<'a> {
    #[must_use]
    pub fn new(paths: &'a SitePaths) -> Self {
        Self { paths }
    }

    /// Installed packages whose descriptor declares `kind`.
    ///
    /// Directories without a valid descriptor are skipped with a warning.
    pub fn addons(&self, kind: PackageKind) -> Result<Vec<InstalledPackage>, FsError> {
        if !self.paths.addons().is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in dir::list(self.paths.addons())? {
            if !entry.is_dir {
                continue;
            }
            let manifest_path = entry.path.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                continue;
            }
            match manifest::load(&manifest_path) {
                Ok(descriptor) if descriptor.kind == kind => found.push(InstalledPackage {
                    descriptor,
                    root: entry.path,
                }),
                Ok(_) => {}
                Err(e) => warn!("[ADDON-REGISTRY] Skipping {:?}: {}", entry.path, e),
            }
        }
        Ok(found)
    }

    /// Every template directory, grouped by module.
    pub fn templates(&self) -> Result<BTreeMap<String, Vec<InstalledTemplate>>, FsError> {
        let mut grouped = BTreeMap::new();
        if !self.paths.templates().is_dir() {
            return Ok(grouped);
        }

        for module in dir::list(self.paths.templates())? {
            if !module.is_dir {
                continue;
            }
            let mut templates = Vec::new();
            for entry in dir::list(&module.path)? {
                if !entry.is_dir {
                    continue;
                }
                let manifest_path = entry.path.join(MANIFEST_FILE);
                let descriptor = if manifest_path.is_file() {
                    manifest::parse(&manifest_path, PackageKind::Template)
                        .map_err(|e| warn!("[ADDON-REGISTRY] Bad template {:?}: {}", entry.path, e))
                        .ok()
                } else {
                    None
                };
                let preview = self
                    .paths
                    .module_static(&module.name)
                    .join(&entry.name)
                    .join(PREVIEW_FILE);

                templates.push(InstalledTemplate {
                    module: module.name.clone(),
                    name: entry.name,
                    root: entry.path,
                    descriptor,
                    preview: preview.is_file().then_some(preview),
                });
            }
            grouped.insert(module.name, templates);
        }
        Ok(grouped)
    }

    /// Returns true when `name` is already installed.
    ///
    /// Templates are looked up under `module` only; addons by descriptor
    /// name or by directory name.
    pub fn contains(
        &self,
        kind: PackageKind,
        name: &str,
        module: Option<&str>,
    ) -> Result<bool, FsError> {
        if kind.is_template() {
            return Ok(module.is_some_and(|m| self.paths.module_templates(m).join(name).is_dir()));
        }
        if self.paths.addon_root(name).is_dir() {
            return Ok(true);
        }
        Ok(self
            .addons(kind)?
            .iter()
            .any(|p| p.descriptor.name == name))
    }
}
