//! Add-on type definitions.
//!
//! Core data structures shared by the installer, the activation manager
//! and the marketplace client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the descriptor file at the root of every package.
pub const MANIFEST_FILE: &str = "info.ini";

/// Name of the overlay subtree inside an addon root.
pub const OVERLAY_DIR: &str = "install";

/// Optional SQL script imported after a fresh addon install.
pub const INSTALL_SQL_FILE: &str = "install.sql";

/// Kind of installable package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// Plain addon with optional lifecycle hooks.
    Addon,
    /// Host module; installed and activated exactly like an addon.
    Module,
    /// Presentation assets bound to a host module.
    Template,
}

impl PackageKind {
    /// Parses a kind from a manifest `type` value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "addon" | "addons" | "plugin" => Some(Self::Addon),
            "module" => Some(Self::Module),
            "template" => Some(Self::Template),
            _ => None,
        }
    }

    /// Returns the manifest spelling of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Addon => "addon",
            Self::Module => "module",
            Self::Template => "template",
        }
    }

    /// Returns true for template packages.
    #[must_use]
    pub fn is_template(&self) -> bool {
        matches!(self, Self::Template)
    }

    /// Manifest keys that must be present and non-blank for this kind.
    #[must_use]
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Template => &["type", "module", "name", "title", "author", "version"],
            Self::Addon | Self::Module => &["type", "name", "title", "author", "version", "status"],
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation status of an addon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonStatus {
    /// Installed but not overlaid onto the site.
    Disabled,
    /// Overlay copied into the site and `enable` hook run.
    Enabled,
    /// Marked as removed.
    Removed,
}

impl AddonStatus {
    /// Converts the numeric manifest code (`0`, `1`, `-1`).
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Disabled),
            1 => Some(Self::Enabled),
            -1 => Some(Self::Removed),
            _ => None,
        }
    }

    /// Returns the numeric manifest code.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Disabled => 0,
            Self::Enabled => 1,
            Self::Removed => -1,
        }
    }
}

/// The four overlay sub-kinds an addon may ship under `install/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    /// Application code, mirrored onto the site base path.
    App,
    /// Web-root files, mirrored onto the public directory.
    Public,
    /// Per-module theme files, mirrored onto each module's active theme.
    Template,
    /// Static assets, copied into `public/static/addons/<name>/`.
    Static,
}

impl OverlayKind {
    /// All overlay kinds in processing order.
    pub const ALL: [OverlayKind; 4] = [Self::App, Self::Public, Self::Template, Self::Static];

    /// Directory name under `install/`.
    #[must_use]
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Public => "public",
            Self::Template => "template",
            Self::Static => "static",
        }
    }

    /// Parses an overlay directory name.
    #[must_use]
    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.dir_name() == name)
    }
}

/// What the caller asks to install, upgrade or uninstall.
///
/// Usually built from a marketplace listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequest {
    /// Package kind.
    #[serde(rename = "type")]
    pub kind: PackageKind,
    /// Package identifier.
    pub name: String,
    /// Version to download.
    #[serde(default)]
    pub version: String,
    /// Host module (templates only).
    #[serde(default)]
    pub module: Option<String>,
}

impl PackageRequest {
    /// Creates a request for an addon.
    #[must_use]
    pub fn addon(name: &str, version: &str) -> Self {
        Self {
            kind: PackageKind::Addon,
            name: name.to_string(),
            version: version.to_string(),
            module: None,
        }
    }

    /// Creates a request for a template skinning `module`.
    #[must_use]
    pub fn template(module: &str, name: &str, version: &str) -> Self {
        Self {
            kind: PackageKind::Template,
            name: name.to_string(),
            version: version.to_string(),
            module: Some(module.to_string()),
        }
    }

    /// Overrides the package kind.
    #[must_use]
    pub fn with_kind(mut self, kind: PackageKind) -> Self {
        self.kind = kind;
        self
    }
}
