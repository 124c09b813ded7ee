//! Undo-list for mutating operations.
//!
//! Each step records the path it is about to create. On failure the
//! list is walked in reverse and every recorded path removed; on
//! success it is discarded.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A single reversible side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    /// A directory created by the operation; removed recursively.
    RemoveDir(PathBuf),
    /// A file created by the operation.
    RemoveFile(PathBuf),
}

/// In-memory record of what one install, upgrade or enable has created.
#[derive(Debug)]
pub struct InstallTransaction {
    label: String,
    actions: Vec<UndoAction>,
}

impl InstallTransaction {
    /// Starts an empty transaction. `label` only shows up in logs.
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            actions: Vec::new(),
        }
    }

    /// Records a directory that is about to be created.
    pub fn record_dir(&mut self, path: &Path) {
        self.actions.push(UndoAction::RemoveDir(path.to_path_buf()));
    }

    /// Records a file that is about to be created.
    pub fn record_file(&mut self, path: &Path) {
        self.actions.push(UndoAction::RemoveFile(path.to_path_buf()));
    }

    /// Number of recorded actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Recorded actions in creation order.
    #[must_use]
    pub fn actions(&self) -> &[UndoAction] {
        &self.actions
    }

    /// Discards the undo list.
    pub fn commit(self) {
        debug!(
            "[ADDON-TXN] {} committed ({} actions)",
            self.label,
            self.actions.len()
        );
    }

    /// Reverses every recorded action, newest first.
    ///
    /// Failures are logged and swallowed; paths that no longer exist are
    /// skipped.
    pub fn rollback(self) {
        warn!(
            "[ADDON-TXN] Rolling back {} ({} actions)",
            self.label,
            self.actions.len()
        );

        for action in self.actions.into_iter().rev() {
            let result = match &action {
                UndoAction::RemoveDir(path) if path.is_dir() => fs::remove_dir_all(path),
                UndoAction::RemoveFile(path) if path.is_file() => fs::remove_file(path),
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!("[ADDON-TXN] Undo of {:?} failed: {}", action, e);
            }
        }
    }
}

/// Runs `op` inside a fresh transaction.
///
/// On `Ok` the transaction is committed. On `Err` it is rolled back and
/// the original error returned untouched.
pub fn run_in_transaction<T, E, F>(label: &str, op: F) -> Result<T, E>
where
    F: FnOnce(&mut InstallTransaction) -> Result<T, E>,
{
    let mut txn = InstallTransaction::new(label);
    match op(&mut txn) {
        Ok(value) => {
            txn.commit();
            Ok(value)
        }
        Err(e) => {
            txn.rollback();
            Err(e)
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rollback_removes_in_reverse_order() {
        let dir = TempDir::new().expect("temp dir");
        let outer = dir.path().join("outer");
        let file = outer.join("file.txt");

        let mut txn = InstallTransaction::new("test");
        txn.record_dir(&outer);
        fs::create_dir(&outer).expect("mkdir");
        txn.record_file(&file);
        fs::write(&file, "x").expect("write");

        assert_eq!(txn.len(), 2);
        txn.rollback();
        assert!(!outer.exists());
    }

    #[test]
    fn test_rollback_skips_missing_paths() {
        let dir = TempDir::new().expect("temp dir");
        let mut txn = InstallTransaction::new("test");
        txn.record_dir(&dir.path().join("never-created"));
        txn.record_file(&dir.path().join("ghost.txt"));
        txn.rollback();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_run_in_transaction_keeps_work_on_success() {
        let dir = TempDir::new().expect("temp dir");
        let created = dir.path().join("kept");

        let result: Result<u8, String> = run_in_transaction("ok", |txn| {
            txn.record_dir(&created);
            fs::create_dir(&created).map_err(|e| e.to_string())?;
            Ok(7)
        });

        assert_eq!(result, Ok(7));
        assert!(created.exists());
    }

    #[test]
    fn test_run_in_transaction_returns_original_error() {
        let dir = TempDir::new().expect("temp dir");
        let created = dir.path().join("undone");

        let result: Result<(), String> = run_in_transaction("fail", |txn| {
            txn.record_dir(&created);
            fs::create_dir(&created).map_err(|e| e.to_string())?;
            Err("boom".to_string())
        });

        assert_eq!(result, Err("boom".to_string()));
        assert!(!created.exists());
    }
}
