//! Enable and disable: overlaying an addon's `install/` tree onto the
//! live site and removing it again.
//!
//! Overlay kinds and where they land:
//!
//! | `install/` subtree        | destination                            |
//! |---------------------------|----------------------------------------|
//! | `app/`                    | site base path                         |
//! | `public/`                 | web root                               |
//! | `template/<module>/`      | active theme of `<module>`             |
//! | `static/`                 | `<public>/static/addons/<name>/`       |
//!
//! Nothing about what was written is persisted; disable recomputes the
//! destination paths from the overlay itself.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::dir::{self, FsError};
use super::error::AddonError;
use super::hooks::{HookKind, HookRegistry};
use super::manifest;
use super::state::ActivationStore;
use super::transaction::run_in_transaction;
use super::types::{AddonStatus, OverlayKind};
use crate::config::SitePaths;

const STATIC_DIR_MODE: u32 = 0o755;

/// One overlay subtree mirrored onto an existing site directory.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mirror {
    kind: OverlayKind,
    source: PathBuf,
    dest: PathBuf,
}

/// Everything an addon's overlay would touch.
#[derive(Debug, Default)]
struct OverlayPlan {
    mirrors: Vec<Mirror>,
    static_source: Option<PathBuf>,
    static_dest: PathBuf,
}

impl OverlayPlan {
    fn is_empty(&self) -> bool {
        self.mirrors.is_empty() && self.static_source.is_none()
    }

    /// Every destination that already exists, across all overlay kinds.
    fn collisions(&self) -> Result<Vec<PathBuf>, FsError> {
        let mut found = Vec::new();
        for mirror in &self.mirrors {
            for entry in dir::rglob(&mirror.source.join("*"), &[])? {
                let Some(target) = mirrored_path(&mirror.source, &mirror.dest, &entry) else {
                    continue;
                };
                let clash = if entry.is_dir() {
                    target.is_file()
                } else {
                    target.exists()
                };
                if clash {
                    found.push(target);
                }
            }
        }
        if self.static_source.is_some() && self.static_dest.exists() {
            found.push(self.static_dest.clone());
        }
        Ok(found)
    }
}

/// Toggles addons on and off.
pub struct ActivationManager<'a> {
    paths: &'a SitePaths,
    themes: &'a BTreeMap<String, String>,
    hooks: &'a HookRegistry,
    store: &'a ActivationStore,
}

impl<'a> ActivationManager<'a> {
    /// `themes` maps each site module to its active theme; template
    /// overlays for other modules are ignored.
    #[must_use]
    pub fn new(
        paths: &'a SitePaths,
        themes: &'a BTreeMap<String, String>,
        hooks: &'a HookRegistry,
        store: &'a ActivationStore,
    ) -> Self {
        Self {
            paths,
            themes,
            hooks,
            store,
        }
    }

    /// Current status of `name`.
    pub fn status(&self, name: &str) -> Result<AddonStatus, AddonError> {
        Ok(self.store.status(name)?)
    }

    fn ensure_installed(&self, name: &str) -> Result<(), AddonError> {
        manifest::validate_identifier(name)?;
        if !self.paths.addon_root(name).is_dir() {
            return Err(AddonError::validation(format!(
                "addon '{}' is not installed",
                name
            )));
        }
        Ok(())
    }

    fn plan(&self, name: &str) -> Result<OverlayPlan, FsError> {
        let overlay = self.paths.addon_overlay(name);
        let mut plan = OverlayPlan {
            static_dest: self.paths.addons_static().join(name),
            ..OverlayPlan::default()
        };
        if !overlay.is_dir() {
            return Ok(plan);
        }

        for kind in OverlayKind::ALL {
            let source = overlay.join(kind.dir_name());
            if !source.is_dir() || dir::is_empty(&source)? {
                continue;
            }
            match kind {
                OverlayKind::App => plan.mirrors.push(Mirror {
                    kind,
                    source,
                    dest: self.paths.base().to_path_buf(),
                }),
                OverlayKind::Public => plan.mirrors.push(Mirror {
                    kind,
                    source,
                    dest: self.paths.public().to_path_buf(),
                }),
                OverlayKind::Template => {
                    for entry in dir::list(&source)? {
                        if !entry.is_dir {
                            continue;
                        }
                        let Some(theme) = self.themes.get(&entry.name) else {
                            debug!(
                                "[ADDON-ENABLE] {}: no active theme for module '{}'",
                                name, entry.name
                            );
                            continue;
                        };
                        plan.mirrors.push(Mirror {
                            kind,
                            dest: self.paths.theme_dir(&entry.name, theme),
                            source: entry.path,
                        });
                    }
                }
                OverlayKind::Static => plan.static_source = Some(source),
            }
        }
        Ok(plan)
    }

    /// Copies the addon's overlay into the site, runs its `enable` hook
    /// and records it as enabled.
    ///
    /// Every collision across all overlay kinds is collected before the
    /// first copy. On any later failure every directory and file created
    /// by this call is removed again.
    pub fn enable(&self, name: &str) -> Result<(), AddonError> {
        self.ensure_installed(name)?;
        let plan = self.plan(name)?;

        let collisions = plan.collisions()?;
        if !collisions.is_empty() {
            return Err(AddonError::Collision(collisions));
        }

        let shared_static = self.paths.addons_static();
        if plan.static_source.is_some() && !dir::is_writable(&shared_static) {
            return Err(FsError::NotWritable(shared_static).into());
        }

        run_in_transaction(&format!("enable {}", name), |txn| {
            for mirror in &plan.mirrors {
                debug!(
                    "[ADDON-ENABLE] {} {:?}: {:?} -> {:?}",
                    name, mirror.kind, mirror.source, mirror.dest
                );
                dir::copy_tree_tracked(&mirror.source, &mirror.dest, txn)?;
            }

            if let Some(source) = &plan.static_source {
                txn.record_dir(&plan.static_dest);
                dir::create_dir(&plan.static_dest, STATIC_DIR_MODE, false)?;
                dir::copy_tree_tracked(source, &plan.static_dest, txn)?;
            }

            self.hooks.invoke(name, HookKind::Enable)?;
            self.store.set_status(name, AddonStatus::Enabled)?;
            Ok::<(), AddonError>(())
        })?;

        if plan.is_empty() {
            info!("[ADDON-ENABLE] Enabled {} (no overlay)", name);
        } else {
            info!(
                "[ADDON-ENABLE] Enabled {} ({} mirror(s), static: {})",
                name,
                plan.mirrors.len(),
                plan.static_source.is_some()
            );
        }
        Ok(())
    }

    /// Removes the addon's overlay from the site, runs its `disable` hook
    /// and records it as disabled.
    ///
    /// Only paths that still exist are touched, and mirrored directories
    /// are removed only when empty, so running it twice is harmless.
    pub fn disable(&self, name: &str) -> Result<(), AddonError> {
        self.ensure_installed(name)?;
        let plan = self.plan(name)?;

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for mirror in &plan.mirrors {
            collect_mirrored(mirror, &mut files, &mut dirs)?;
        }

        let mut statics = Vec::new();
        if plan.static_source.is_some() && plan.static_dest.is_dir() {
            let shared = self.paths.addons_static();
            if !dir::is_writable(&shared) {
                return Err(FsError::NotWritable(shared).into());
            }
            statics.push(plan.static_dest.clone());
        }

        for file in &files {
            fs::remove_file(file).map_err(|source| FsError::Remove {
                path: file.clone(),
                source,
            })?;
        }
        for d in dirs.iter().rev() {
            dir::delete_tree_if_empty(d)?;
        }
        for d in &statics {
            dir::delete_tree(d)?;
        }

        self.hooks.invoke(name, HookKind::Disable)?;
        self.store.set_status(name, AddonStatus::Disabled)?;

        info!(
            "[ADDON-ENABLE] Disabled {} ({} file(s), {} static dir(s) removed)",
            name,
            files.len(),
            statics.len()
        );
        Ok(())
    }
}

/// Collects the existing destinations of one mirror, checking each is
/// writable. Directories come out parents first.
fn collect_mirrored(
    mirror: &Mirror,
    files: &mut Vec<PathBuf>,
    dirs: &mut Vec<PathBuf>,
) -> Result<(), FsError> {
    for entry in dir::rglob(&mirror.source.join("*"), &[])? {
        let Some(target) = mirrored_path(&mirror.source, &mirror.dest, &entry) else {
            continue;
        };
        if !target.exists() {
            continue;
        }
        if !dir::is_writable(&target) {
            return Err(FsError::NotWritable(target));
        }
        if entry.is_dir() {
            dirs.push(target);
        } else if target.is_file() {
            files.push(target);
        }
    }
    Ok(())
}

/// Where `entry` under `source_root` lands under `dest_root`.
fn mirrored_path(source_root: &Path, dest_root: &Path, entry: &Path) -> Option<PathBuf> {
    entry
        .strip_prefix(source_root)
        .ok()
        .map(|rel| dest_root.join(rel))
}
