//! Temporary CMS site layout plus helpers for building packages,
//! snapshotting trees and observing hooks.

#![allow(dead_code, clippy::expect_used)]

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use cms_addons::addons::{
    AddonLifecycle, HookError, HookKind, InstallOrchestrator, MemoryCache, PackageClient,
    SqlImporter,
};
use cms_addons::config::SitePaths;
use tempfile::TempDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Module with an active theme in every fixture site.
pub const MODULE: &str = "index";
/// Active theme of [`MODULE`].
pub const THEME: &str = "default";

/// A throwaway site: `addons/`, `runtime/`, `template/index/default/`,
/// `public/static/index/` and `public/static/addons/`.
pub struct TestSite {
    pub dir: TempDir,
    pub paths: SitePaths,
    pub themes: BTreeMap<String, String>,
}

impl TestSite {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let paths = SitePaths::new(dir.path());
        for d in [
            paths.addons().to_path_buf(),
            paths.runtime().to_path_buf(),
            paths.theme_dir(MODULE, THEME),
            paths.module_static(MODULE),
            paths.addons_static(),
        ] {
            fs::create_dir_all(&d).expect("mkdir");
        }

        let mut themes = BTreeMap::new();
        themes.insert(MODULE.to_string(), THEME.to_string());
        Self { dir, paths, themes }
    }

    /// A site with no `public/static/` tree at all.
    pub fn without_static() -> Self {
        let site = Self::new();
        fs::remove_dir_all(site.paths.public().join("static")).expect("rmdir");
        site
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Orchestrator talking to `api_url` with an in-memory token cache.
    pub fn orchestrator(&self, api_url: &str) -> InstallOrchestrator {
        let client = PackageClient::new(
            api_url,
            "2.1.0",
            &self.paths.scratch(),
            Arc::new(MemoryCache::new()),
        );
        InstallOrchestrator::new(self.paths.clone(), self.themes.clone(), client)
    }

    /// Orchestrator whose marketplace is unreachable.
    pub fn offline_orchestrator(&self) -> InstallOrchestrator {
        self.orchestrator("http://127.0.0.1:9")
    }

    /// Every path under the site except `runtime/`.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        snapshot_excluding(self.root(), &["runtime"])
    }

    /// Returns true when the scratch directory is absent or empty.
    pub fn scratch_is_clean(&self) -> bool {
        let scratch = self.paths.scratch();
        !scratch.exists()
            || fs::read_dir(&scratch)
                .expect("read scratch")
                .next()
                .is_none()
    }
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, content).expect("write");
}

/// Relative path to file content, with `"<dir>"` for directories.
pub fn snapshot(root: &Path) -> BTreeMap<String, String> {
    snapshot_excluding(root, &[])
}

fn snapshot_excluding(root: &Path, skip: &[&str]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    walk(root, root, skip, &mut out);
    out
}

fn walk(root: &Path, dir: &Path, skip: &[&str], out: &mut BTreeMap<String, String>) {
    for entry in fs::read_dir(dir).expect("read dir") {
        let path = entry.expect("entry").path();
        let rel = path
            .strip_prefix(root)
            .expect("under root")
            .to_string_lossy()
            .replace('\\', "/");
        if skip.contains(&rel.as_str()) {
            continue;
        }
        if path.is_dir() {
            out.insert(rel, "<dir>".to_string());
            walk(root, &path, skip, out);
        } else {
            let content = fs::read(&path).expect("read file");
            out.insert(rel, String::from_utf8_lossy(&content).into_owned());
        }
    }
}

/// Zip archive in memory holding `files` (name, content).
pub fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start file");
        writer.write_all(content).expect("write entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

pub fn addon_ini(name: &str, version: &str) -> String {
    format!(
        "; test package\ntype = addon\nname = {name}\ntitle = \"{name} addon\"\n\
         author = tester\nversion = {version}\nstatus = 0\n"
    )
}

pub fn template_ini(module: &str, name: &str, version: &str) -> String {
    format!(
        "type = template\nmodule = {module}\nname = {name}\ntitle = \"{name} theme\"\n\
         author = tester\nversion = {version}\n"
    )
}

/// Lifecycle hooks that remember every call and can be told to fail.
#[derive(Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<HookKind>>,
    fail_on: Option<HookKind>,
}

impl RecordingHooks {
    pub fn failing_on(kind: HookKind) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(kind),
        }
    }

    pub fn calls(&self) -> Vec<HookKind> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn count(&self, kind: HookKind) -> usize {
        self.calls().iter().filter(|k| **k == kind).count()
    }

    fn record(&self, kind: HookKind) -> Result<(), HookError> {
        self.calls.lock().expect("lock").push(kind);
        if self.fail_on == Some(kind) {
            return Err(HookError::from(format!("{kind} refused")));
        }
        Ok(())
    }
}

impl AddonLifecycle for RecordingHooks {
    fn install(&self) -> Result<(), HookError> {
        self.record(HookKind::Install)
    }

    fn uninstall(&self) -> Result<(), HookError> {
        self.record(HookKind::Uninstall)
    }

    fn enable(&self) -> Result<(), HookError> {
        self.record(HookKind::Enable)
    }

    fn disable(&self) -> Result<(), HookError> {
        self.record(HookKind::Disable)
    }

    fn upgrade(&self) -> Result<(), HookError> {
        self.record(HookKind::Upgrade)
    }
}

/// SQL importer that keeps every script it is handed.
#[derive(Clone, Default)]
pub struct RecordingImporter {
    pub scripts: Arc<Mutex<Vec<(String, String)>>>,
}

impl SqlImporter for RecordingImporter {
    fn import(&self, addon: &str, script: &str) -> Result<(), String> {
        self.scripts
            .lock()
            .map_err(|e| e.to_string())?
            .push((addon.to_string(), script.to_string()));
        Ok(())
    }
}
