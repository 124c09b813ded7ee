//! Addon lifecycle hooks and SQL import.
//!
//! An addon takes part in its own lifecycle by registering an
//! [`AddonLifecycle`] object under its identifier. Every hook is
//! optional; unregistered addons simply have none.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::error::AddonError;

/// Lifecycle points an addon can hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Install,
    Uninstall,
    Enable,
    Disable,
    Upgrade,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Upgrade => "upgrade",
        };
        f.write_str(name)
    }
}

/// Failure raised by an addon's own hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl From<String> for HookError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for HookError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

/// Hooks an addon may implement. All default to doing nothing.
pub trait AddonLifecycle: Send + Sync {
    /// After a fresh install has been moved into place.
    fn install(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Before the addon tree is deleted.
    fn uninstall(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// After the overlay has been copied into the site.
    fn enable(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// After the overlay has been removed from the site.
    fn disable(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// After a new version has been moved over the old one.
    fn upgrade(&self) -> Result<(), HookError> {
        Ok(())
    }
}

/// Addon identifier to lifecycle object.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn AddonLifecycle>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.hooks.keys().collect();
        names.sort();
        f.debug_struct("HookRegistry").field("addons", &names).finish()
    }
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hooks` for `name`, replacing any previous object.
    pub fn register(&mut self, name: &str, hooks: Arc<dyn AddonLifecycle>) {
        self.hooks.insert(name.to_string(), hooks);
    }

    /// Removes the hooks of `name`.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn AddonLifecycle>> {
        self.hooks.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AddonLifecycle>> {
        self.hooks.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    /// Runs hook `kind` of `name`.
    ///
    /// Returns `Ok(false)` when the addon registered nothing.
    pub fn invoke(&self, name: &str, kind: HookKind) -> Result<bool, AddonError> {
        let Some(hooks) = self.hooks.get(name) else {
            return Ok(false);
        };

        debug!("[ADDON-HOOK] {} -> {}", name, kind);
        let result = match kind {
            HookKind::Install => hooks.install(),
            HookKind::Uninstall => hooks.uninstall(),
            HookKind::Enable => hooks.enable(),
            HookKind::Disable => hooks.disable(),
            HookKind::Upgrade => hooks.upgrade(),
        };

        result.map(|()| true).map_err(|e| AddonError::Hook {
            addon: name.to_string(),
            hook: kind,
            message: e.0,
        })
    }
}

/// Imports an addon's `install.sql` into the site database.
pub trait SqlImporter: Send + Sync {
    fn import(&self, addon: &str, script: &str) -> Result<(), String>;
}
