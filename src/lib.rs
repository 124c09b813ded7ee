//! cms-addons
//!
//! Lifecycle manager for CMS add-ons and templates: download from a
//! marketplace, install into a site tree, enable and disable overlays,
//! upgrade and uninstall, with rollback of partial work on failure.
//!
//! # Architecture
//!
//! - **Addons Module**: directory primitives, manifest parsing, the
//!   marketplace client, activation and the install orchestrator
//! - **Config Module**: TOML configuration and the resolved site layout
//! - **Logging Module**: file logging with retention cleanup

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod addons;
pub mod config;
pub mod logging;

// Re-export main types
pub use addons::{
    ActivationManager, AddonError, ErrorKind, InstallOrchestrator, PackageClient, PackageKind,
    PackageRequest,
};
pub use config::{ManagerConfig, SitePaths};
pub use logging::LogConfig;
