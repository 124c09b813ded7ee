//! Install, upgrade, local install and uninstall.
//!
//! Every operation follows the same shape: permission pre-check, acquire
//! the archive, extract into scratch, validate `info.ini`, move into
//! place, run lifecycle hooks, activate. Everything after the pre-check
//! runs inside one [`InstallTransaction`] so a failure removes whatever
//! the operation created before the error is returned.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use super::activation::ActivationManager;
use super::archive;
use super::client::PackageClient;
use super::dir::{self, FsError};
use super::error::AddonError;
use super::hooks::{AddonLifecycle, HookKind, HookRegistry, SqlImporter};
use super::manifest::{self, PackageDescriptor};
use super::registry::LocalRegistry;
use super::state::ActivationStore;
use super::transaction::{InstallTransaction, run_in_transaction};
use super::types::{AddonStatus, INSTALL_SQL_FILE, MANIFEST_FILE, PackageKind, PackageRequest};
use crate::config::{ManagerConfig, SitePaths};

/// Mode for package roots created during install.
const ROOT_DIR_MODE: u32 = 0o755;

/// Directory inside a template package holding its public assets.
const TEMPLATE_STATIC_DIR: &str = "static";

/// Locations resolved by the pre-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTargets {
    /// Download and extraction directory.
    pub scratch: PathBuf,
    /// Where the package tree ends up.
    pub root: PathBuf,
    /// Where a template's `static/` subtree ends up.
    pub static_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deploy {
    Install,
    Upgrade { was_enabled: bool },
}

impl Deploy {
    fn label(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade { .. } => "upgrade",
        }
    }
}

/// Drives the package lifecycle for one site.
///
/// Owns the marketplace client, the hook registry and the state store;
/// nothing is shared through globals.
pub struct InstallOrchestrator {
    paths: SitePaths,
    themes: BTreeMap<String, String>,
    client: PackageClient,
    hooks: HookRegistry,
    store: ActivationStore,
    sql: Option<Box<dyn SqlImporter>>,
}

impl InstallOrchestrator {
    #[must_use]
    pub fn new(paths: SitePaths, themes: BTreeMap<String, String>, client: PackageClient) -> Self {
        let store = ActivationStore::new(&paths.state_file());
        Self {
            paths,
            themes,
            client,
            hooks: HookRegistry::new(),
            store,
            sql: None,
        }
    }

    /// Builds an orchestrator for the site described by `config`.
    #[must_use]
    pub fn from_config(config: &ManagerConfig) -> Self {
        let paths = config.site_paths();
        let client = PackageClient::from_config(config, &paths);
        Self::new(paths, config.themes.clone(), client)
    }

    /// Sets the importer used for `install.sql`.
    #[must_use]
    pub fn with_sql_importer(mut self, importer: Box<dyn SqlImporter>) -> Self {
        self.sql = Some(importer);
        self
    }

    /// Registers lifecycle hooks for an addon.
    pub fn register_hooks(&mut self, name: &str, hooks: Arc<dyn AddonLifecycle>) {
        self.hooks.register(name, hooks);
    }

    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    #[must_use]
    pub fn client(&self) -> &PackageClient {
        &self.client
    }

    #[must_use]
    pub fn store(&self) -> &ActivationStore {
        &self.store
    }

    #[must_use]
    pub fn paths(&self) -> &SitePaths {
        &self.paths
    }

    #[must_use]
    pub fn registry(&self) -> LocalRegistry<'_> {
        LocalRegistry::new(&self.paths)
    }

    #[must_use]
    pub fn activation(&self) -> ActivationManager<'_> {
        ActivationManager::new(&self.paths, &self.themes, &self.hooks, &self.store)
    }

    pub fn enable(&self, name: &str) -> Result<(), AddonError> {
        self.activation().enable(name)
    }

    pub fn disable(&self, name: &str) -> Result<(), AddonError> {
        self.activation().disable(name)
    }

    /// Permission pre-check. Touches nothing but the scratch directory,
    /// and only once every check has passed.
    pub fn competence(
        &self,
        kind: PackageKind,
        name: &str,
        module: Option<&str>,
        upgrade: bool,
    ) -> Result<InstallTargets, AddonError> {
        manifest::validate_identifier(name)?;

        let (root, static_root) = if kind.is_template() {
            let module = module.ok_or_else(|| {
                AddonError::validation(format!("template '{}' needs a host module", name))
            })?;
            manifest::validate_identifier(module)?;

            let template_dir = self.paths.module_templates(module);
            let static_dir = self.paths.module_static(module);
            for dir_path in [&template_dir, &static_dir] {
                if !dir_path.is_dir() {
                    return Err(AddonError::validation(format!(
                        "module '{}' has no directory {}",
                        module,
                        dir_path.display()
                    )));
                }
                if !dir::is_writable(dir_path) {
                    return Err(AddonError::validation(format!(
                        "directory {} is not writable",
                        dir_path.display()
                    )));
                }
            }

            let root = template_dir.join(name);
            let static_root = static_dir.join(name);
            if !upgrade {
                for target in [&root, &static_root] {
                    if target.is_dir() {
                        return Err(AddonError::validation(format!(
                            "template directory {} already exists",
                            target.display()
                        )));
                    }
                }
            }
            (root, Some(static_root))
        } else {
            let addons = self.paths.addons();
            if !dir::is_writable(addons) {
                return Err(AddonError::validation(format!(
                    "no write permission on {}",
                    addons.display()
                )));
            }
            if !upgrade && self.existing_addon_names()?.iter().any(|n| n == name) {
                return Err(AddonError::validation(format!(
                    "addon directory '{}' already exists",
                    name
                )));
            }
            (self.paths.addon_root(name), None)
        };

        let scratch = self.paths.scratch();
        if !scratch.is_dir() {
            dir::create_dir(&scratch, ROOT_DIR_MODE, true)?;
        }

        Ok(InstallTargets {
            scratch,
            root,
            static_root,
        })
    }

    /// Entries of the addons directory that look like package names.
    fn existing_addon_names(&self) -> Result<Vec<String>, FsError> {
        Ok(dir::list(self.paths.addons())?
            .into_iter()
            .map(|e| e.name)
            .filter(|n| !n.contains('.'))
            .collect())
    }

    /// Downloads and installs a package from the marketplace.
    pub fn install(&self, req: &PackageRequest) -> Result<PackageDescriptor, AddonError> {
        info!(
            "[ADDON-INSTALL] Installing {} '{}' {}",
            req.kind, req.name, req.version
        );
        let targets = self.competence(req.kind, &req.name, req.module.as_deref(), false)?;
        let archive_path = self.client.download(&req.name, &req.version)?;
        let extract_dir = targets.scratch.join(&req.name);

        self.deploy_download(req, &targets, &archive_path, &extract_dir, Deploy::Install)
    }

    /// Replaces an installed package with the requested version.
    ///
    /// An enabled addon is disabled first and re-enabled afterwards.
    pub fn upgrade(&self, req: &PackageRequest) -> Result<PackageDescriptor, AddonError> {
        info!(
            "[ADDON-INSTALL] Upgrading {} '{}' to {}",
            req.kind, req.name, req.version
        );
        if !is_path_safe_version(&req.version) {
            return Err(AddonError::validation(format!(
                "invalid version '{}'",
                req.version
            )));
        }
        let targets = self.competence(req.kind, &req.name, req.module.as_deref(), true)?;
        if !targets.root.is_dir() {
            return Err(AddonError::validation(format!(
                "{} '{}' is not installed",
                req.kind, req.name
            )));
        }

        let was_enabled = !req.kind.is_template() && self.store.is_enabled(&req.name)?;
        let stem = format!("{}-{}", req.name, req.version);
        let archive_path = self.client.download_as(&req.name, &req.version, &stem)?;
        let extract_dir = targets.scratch.join(&stem);

        self.deploy_download(
            req,
            &targets,
            &archive_path,
            &extract_dir,
            Deploy::Upgrade { was_enabled },
        )
    }

    fn deploy_download(
        &self,
        req: &PackageRequest,
        targets: &InstallTargets,
        archive_path: &Path,
        extract_dir: &Path,
        mode: Deploy,
    ) -> Result<PackageDescriptor, AddonError> {
        let label = format!("{} {}", mode.label(), req.name);
        let result = run_in_transaction(&label, |txn| {
            txn.record_file(archive_path);
            if extract_dir.is_dir() {
                dir::delete_tree(extract_dir)?;
            }
            txn.record_dir(extract_dir);
            archive::extract(archive_path, extract_dir)?;

            let descriptor = manifest::parse(&extract_dir.join(MANIFEST_FILE), req.kind)?;
            if descriptor.name != req.name {
                return Err(AddonError::validation(format!(
                    "package declares name '{}' but '{}' was requested",
                    descriptor.name, req.name
                )));
            }
            if req.kind.is_template() && descriptor.module != req.module {
                return Err(AddonError::validation(format!(
                    "template '{}' belongs to module '{}'",
                    req.name,
                    descriptor.module.as_deref().unwrap_or_default()
                )));
            }

            self.relocate(&descriptor, targets, extract_dir, mode, txn)?;
            Ok(descriptor)
        });

        self.finish(&req.name, archive_path, mode, result)
    }

    /// Installs a package from an archive already on disk.
    ///
    /// The identifier comes from the archive's own `info.ini`; it is
    /// validated and checked against what is installed before anything
    /// is moved. The archive is removed whatever the outcome.
    pub fn install_local(
        &self,
        kind: PackageKind,
        archive_path: &Path,
    ) -> Result<PackageDescriptor, AddonError> {
        if !archive_path.is_file() {
            return Err(AddonError::validation(format!(
                "archive {} not found",
                archive_path.display()
            )));
        }
        let stem = archive_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extract_dir = archive_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(if stem.is_empty() { "package" } else { &stem });

        info!("[ADDON-INSTALL] Installing {} from {:?}", kind, archive_path);

        let mut claimed = String::new();
        let result = run_in_transaction(&format!("install-local {}", stem), |txn| {
            txn.record_file(archive_path);
            if extract_dir.exists() {
                return Err(AddonError::validation(format!(
                    "extraction directory {} already exists",
                    extract_dir.display()
                )));
            }
            txn.record_dir(&extract_dir);
            archive::extract(archive_path, &extract_dir)?;

            let descriptor = manifest::parse(&extract_dir.join(MANIFEST_FILE), kind)?;
            manifest::validate_identifier(&descriptor.name)?;
            if self
                .registry()
                .contains(kind, &descriptor.name, descriptor.module.as_deref())?
            {
                return Err(AddonError::validation(format!(
                    "{} '{}' is already installed",
                    kind, descriptor.name
                )));
            }

            let targets =
                self.competence(kind, &descriptor.name, descriptor.module.as_deref(), false)?;
            claimed.clone_from(&descriptor.name);
            self.relocate(&descriptor, &targets, &extract_dir, Deploy::Install, txn)?;
            Ok(descriptor)
        });

        self.finish(&claimed, archive_path, Deploy::Install, result)
    }

    /// Moves an extracted, validated package into place and activates it.
    fn relocate(
        &self,
        descriptor: &PackageDescriptor,
        targets: &InstallTargets,
        extract_dir: &Path,
        mode: Deploy,
        txn: &mut InstallTransaction,
    ) -> Result<(), AddonError> {
        if descriptor.kind.is_template() {
            return self.place_template(targets, extract_dir, txn);
        }

        let name = &descriptor.name;
        if let Deploy::Upgrade { was_enabled: true } = mode {
            self.activation().disable(name)?;
        }

        ensure_root(&targets.root, txn)?;
        dir::move_tree(extract_dir, &targets.root, None)?;

        match mode {
            Deploy::Install => {
                self.hooks.invoke(name, HookKind::Install)?;
                self.import_sql(name, &targets.root)?;
            }
            Deploy::Upgrade { .. } => {
                self.hooks.invoke(name, HookKind::Upgrade)?;
            }
        }

        self.store
            .set_version(name, descriptor.kind, &descriptor.version)?;

        match mode {
            Deploy::Install | Deploy::Upgrade { was_enabled: true } => {
                self.activation().enable(name)
            }
            Deploy::Upgrade { was_enabled: false } => Ok(()),
        }
    }

    fn place_template(
        &self,
        targets: &InstallTargets,
        extract_dir: &Path,
        txn: &mut InstallTransaction,
    ) -> Result<(), AddonError> {
        ensure_root(&targets.root, txn)?;

        let static_src = extract_dir.join(TEMPLATE_STATIC_DIR);
        if let Some(static_root) = &targets.static_root {
            ensure_root(static_root, txn)?;
            if static_src.is_dir() {
                if dir::is_empty(&static_src)? {
                    dir::delete_tree(&static_src)?;
                } else {
                    dir::move_tree(&static_src, static_root, None)?;
                }
            }
        }

        dir::move_tree(extract_dir, &targets.root, None)?;
        Ok(())
    }

    fn import_sql(&self, name: &str, root: &Path) -> Result<(), AddonError> {
        let script_path = root.join(INSTALL_SQL_FILE);
        if !script_path.is_file() {
            return Ok(());
        }
        let Some(importer) = &self.sql else {
            warn!(
                "[ADDON-INSTALL] {} ships {} but no SQL importer is configured; skipping",
                name, INSTALL_SQL_FILE
            );
            return Ok(());
        };

        let script = fs::read_to_string(&script_path).map_err(|source| FsError::Read {
            path: script_path.clone(),
            source,
        })?;
        importer
            .import(name, &script)
            .map_err(|message| AddonError::SqlImport {
                addon: name.to_string(),
                message,
            })?;
        info!("[ADDON-INSTALL] Imported {} for {}", INSTALL_SQL_FILE, name);
        Ok(())
    }

    fn finish(
        &self,
        name: &str,
        archive_path: &Path,
        mode: Deploy,
        result: Result<PackageDescriptor, AddonError>,
    ) -> Result<PackageDescriptor, AddonError> {
        match result {
            Ok(descriptor) => {
                if archive_path.exists() {
                    if let Err(e) = fs::remove_file(archive_path) {
                        warn!("[ADDON-INSTALL] Could not remove {:?}: {}", archive_path, e);
                    }
                }
                info!(
                    "[ADDON-INSTALL] {} of {} '{}' {} complete",
                    mode.label(),
                    descriptor.kind,
                    descriptor.name,
                    descriptor.version
                );
                Ok(descriptor)
            }
            Err(e) => {
                error!("[ADDON-INSTALL] {} of '{}' failed: {}", mode.label(), name, e);
                match mode {
                    Deploy::Install if !name.is_empty() => {
                        if let Err(forget_err) = self.store.forget(name) {
                            warn!(
                                "[ADDON-INSTALL] Could not clear state of {}: {}",
                                name, forget_err
                            );
                        }
                    }
                    Deploy::Upgrade { was_enabled: true } => self.restore_enabled(name),
                    _ => {}
                }
                Err(e)
            }
        }
    }

    /// Re-enables an addon that an aborted upgrade left disabled.
    fn restore_enabled(&self, name: &str) {
        if matches!(self.store.status(name), Ok(AddonStatus::Enabled)) {
            return;
        }
        if let Err(e) = self.activation().enable(name) {
            warn!("[ADDON-INSTALL] Could not re-enable {} after failed upgrade: {}", name, e);
        }
    }

    /// Removes an installed package.
    ///
    /// Addons are disabled first when enabled, then their `uninstall`
    /// hook runs. Deleting the package tree is best-effort.
    pub fn uninstall(&self, req: &PackageRequest) -> Result<(), AddonError> {
        manifest::validate_identifier(&req.name)?;
        info!("[ADDON-INSTALL] Uninstalling {} '{}'", req.kind, req.name);

        if req.kind.is_template() {
            let module = req.module.as_deref().ok_or_else(|| {
                AddonError::validation(format!("template '{}' needs a host module", req.name))
            })?;
            manifest::validate_identifier(module)?;
            delete_best_effort(&self.paths.module_templates(module).join(&req.name));
            delete_best_effort(&self.paths.module_static(module).join(&req.name));
            return Ok(());
        }

        let root = self.paths.addon_root(&req.name);
        if !root.is_dir() {
            return Err(AddonError::validation(format!(
                "addon '{}' is not installed",
                req.name
            )));
        }

        if self.store.is_enabled(&req.name)? {
            self.activation().disable(&req.name)?;
        }
        self.hooks.invoke(&req.name, HookKind::Uninstall)?;
        delete_best_effort(&root);
        self.store.forget(&req.name)?;
        Ok(())
    }

    /// Zips an installed package tree into `dest`.
    pub fn pack(&self, req: &PackageRequest, dest: &Path) -> Result<usize, AddonError> {
        manifest::validate_identifier(&req.name)?;
        let root = match (req.kind.is_template(), req.module.as_deref()) {
            (true, Some(module)) => self.paths.module_templates(module).join(&req.name),
            (true, None) => {
                return Err(AddonError::validation(format!(
                    "template '{}' needs a host module",
                    req.name
                )));
            }
            (false, _) => self.paths.addon_root(&req.name),
        };
        Ok(archive::pack_dir(&root, dest)?)
    }
}

/// Creates `root` if missing, recording it for rollback.
fn ensure_root(root: &Path, txn: &mut InstallTransaction) -> Result<(), FsError> {
    if root.is_dir() {
        return Ok(());
    }
    txn.record_dir(root);
    dir::create_dir(root, ROOT_DIR_MODE, true)
}

fn delete_best_effort(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = dir::delete_tree(path) {
        warn!("[ADDON-INSTALL] Could not delete {:?}: {}", path, e);
    }
}

/// A version is spliced into scratch file names, so it must stay a single
/// path component.
fn is_path_safe_version(version: &str) -> bool {
    !version.is_empty()
        && !version.contains("..")
        && !version
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
}
