//! Error taxonomy of the add-on subsystem.

use std::path::PathBuf;

use thiserror::Error;

use super::archive::ArchiveError;
use super::client::RemoteError;
use super::dir::FsError;
use super::hooks::HookKind;
use super::manifest::ManifestError;
use super::state::StateError;
use crate::config::ConfigError;

/// Coarse class of an [`AddonError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or failed pre-check; raised before anything is touched.
    Validation,
    /// Filesystem or persistence failure.
    Io,
    /// Marketplace failure.
    Remote,
    /// An addon's own hook failed.
    LifecycleHook,
}

/// Error returned by every public add-on operation.
#[derive(Debug, Error)]
pub enum AddonError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("addon '{addon}' {hook} hook failed: {message}")]
    Hook {
        addon: String,
        hook: HookKind,
        message: String,
    },

    #[error("SQL import for '{addon}' failed: {message}")]
    SqlImport { addon: String, message: String },

    /// Overlay files that already exist in the site.
    #[error("overlay would overwrite existing files: {}", format_paths(.0))]
    Collision(Vec<PathBuf>),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl AddonError {
    /// Builds a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Maps the error onto its [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Manifest(_) | Self::Collision(_) | Self::Config(_) => {
                ErrorKind::Validation
            }
            Self::Remote(RemoteError::EmptyFilterType) => ErrorKind::Validation,
            Self::Remote(RemoteError::SaveDenied { .. }) => ErrorKind::Io,
            Self::Remote(_) => ErrorKind::Remote,
            Self::Archive(ArchiveError::UnsafeEntry(_)) => ErrorKind::Validation,
            Self::Fs(_) | Self::Archive(_) | Self::State(_) | Self::SqlImport { .. } => {
                ErrorKind::Io
            }
            Self::Hook { .. } => ErrorKind::LifecycleHook,
        }
    }

    /// HTTP-style status code for client-facing responses.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match (self.kind(), self) {
            (ErrorKind::Validation, _) => 400,
            (ErrorKind::Remote, Self::Remote(RemoteError::NotFound)) => 404,
            (ErrorKind::Remote, _) => 502,
            (ErrorKind::Io | ErrorKind::LifecycleHook, _) => 500,
        }
    }
}
