//! Add-on lifecycle management.
//!
//! Downloads packages from the marketplace, installs them into the site
//! tree, toggles their overlays on and off and removes them again.
//!
//! # Architecture
//!
//! - **dir**: recursive list, glob, copy, move and delete primitives
//! - **transaction**: undo-list threaded through every mutating operation
//! - **manifest**: typed `info.ini` parsing and identifier validation
//! - **archive**: zip extraction and packing
//! - **client**: marketplace API (`{code, data, msg}` envelopes, downloads)
//! - **cache**: TTL key-value store holding the login token
//! - **hooks**: per-addon lifecycle hooks and SQL import
//! - **state**: persisted enabled/disabled status
//! - **registry**: scan of installed addons and templates
//! - **activation**: enable/disable overlays
//! - **orchestrator**: install, upgrade, local install, uninstall
//!
//! # Usage
//!
//! ```no_run
//! use cms_addons::addons::{InstallOrchestrator, PackageRequest};
//! use cms_addons::config::ManagerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig::load(&ManagerConfig::default_path()?)?;
//! let orchestrator = InstallOrchestrator::from_config(&config);
//! orchestrator.install(&PackageRequest::addon("demo", "1.0.0"))?;
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod archive;
pub mod cache;
pub mod client;
pub mod dir;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod orchestrator;
pub mod registry;
pub mod state;
pub mod transaction;
mod types;

pub use activation::ActivationManager;
pub use archive::ArchiveError;
pub use cache::{FileCache, KeyValueCache, MemoryCache};
pub use client::{ApiRequest, PackageClient, RemoteError};
pub use dir::{FsError, ListEntry};
pub use error::{AddonError, ErrorKind};
pub use hooks::{AddonLifecycle, HookError, HookKind, HookRegistry, SqlImporter};
pub use manifest::{ManifestError, PackageDescriptor};
pub use orchestrator::{InstallOrchestrator, InstallTargets};
pub use registry::{InstalledPackage, InstalledTemplate, LocalRegistry};
pub use state::{ActivationStore, AddonRecord, StateError};
pub use transaction::{InstallTransaction, UndoAction, run_in_transaction};
pub use types::{
    AddonStatus, INSTALL_SQL_FILE, MANIFEST_FILE, OVERLAY_DIR, OverlayKind, PackageKind,
    PackageRequest,
};
