//! Recursive directory primitives.
//!
//! Listing, recursive glob, tree copy, rename-based tree merge and
//! deletion. Every other part of the add-on system touches the site tree
//! only through these functions.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use thiserror::Error;
use tracing::{debug, warn};

use super::transaction::InstallTransaction;

/// Mode for directories created by [`copy_tree`].
const COPY_DIR_MODE: u32 = 0o700;

/// Mode for directories created by [`move_tree`].
const MOVE_DIR_MODE: u32 = 0o777;

/// Filesystem failures, each naming the offending path.
#[derive(Debug, Error)]
pub enum FsError {
    /// Copy source is not a directory.
    #[error("source directory {} does not exist", .0.display())]
    SourceMissing(PathBuf),

    /// Path expected to be a directory is not one.
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Path exists but carries no write permission.
    #[error("{} is not writable", .0.display())]
    NotWritable(PathBuf),

    /// Nothing to move out of the source tree.
    #[error("nothing to move: {} is empty", .0.display())]
    EmptySource(PathBuf),

    /// Directory creation failed.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File or directory removal failed.
    #[error("failed to remove {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Rename into the destination tree failed.
    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Byte copy failed.
    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Glob pattern did not compile.
    #[error("invalid glob pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
}

/// One entry returned by [`list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// File name.
    pub name: String,
    /// Full path.
    pub path: PathBuf,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Lists the immediate entries of `dir`, directories first, each group
/// ordered by name.
pub fn list(dir: &Path) -> Result<Vec<ListEntry>, FsError> {
    let mut entries: Vec<ListEntry> = sorted_entries(dir)?
        .into_iter()
        .map(|path| ListEntry {
            name: file_name(&path),
            is_dir: path.is_dir(),
            path,
        })
        .collect();

    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}

/// Expands a single-level glob, then repeats it in every subdirectory.
///
/// `pattern` is a directory plus a file-name pattern (`/a/*`, `/a/*.php`).
/// Matches at one level come before the matches of its subdirectories.
/// Directories listed in `ignore` are neither returned nor descended into.
/// A missing directory or a pattern matching nothing yields an empty list.
pub fn rglob(pattern: &Path, ignore: &[PathBuf]) -> Result<Vec<PathBuf>, FsError> {
    let dir = pattern.parent().unwrap_or_else(|| Path::new("."));
    let leaf = pattern
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "*".to_string());

    let matcher = Pattern::new(&leaf).map_err(|e| FsError::Pattern {
        pattern: pattern.display().to_string(),
        reason: e.to_string(),
    })?;

    let entries = match sorted_entries(dir) {
        Ok(entries) => entries,
        Err(FsError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let options = MatchOptions::new();
    let mut found = Vec::new();
    let mut subdirs = Vec::new();

    for path in entries {
        if ignore.iter().any(|i| i == &path) {
            continue;
        }
        if matcher.matches_with(&file_name(&path), options) {
            found.push(path.clone());
        }
        if path.is_dir() {
            subdirs.push(path);
        }
    }

    for sub in subdirs {
        found.extend(rglob(&sub.join(&leaf), ignore)?);
    }

    Ok(found)
}

/// Copies the tree under `source` into `dest`, merging with whatever
/// `dest` already holds. Missing directories are created with mode 0700.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<(), FsError> {
    copy_tree_inner(source, dest, None)
}

/// Like [`copy_tree`] but records every directory and file it creates in
/// `txn` before creating it. Pre-existing files are overwritten and not
/// recorded.
pub fn copy_tree_tracked(
    source: &Path,
    dest: &Path,
    txn: &mut InstallTransaction,
) -> Result<(), FsError> {
    copy_tree_inner(source, dest, Some(txn))
}

fn copy_tree_inner(
    source: &Path,
    dest: &Path,
    mut txn: Option<&mut InstallTransaction>,
) -> Result<(), FsError> {
    if !source.is_dir() {
        return Err(FsError::SourceMissing(source.to_path_buf()));
    }

    if !dest.is_dir() {
        if let Some(t) = txn.as_deref_mut() {
            t.record_dir(dest);
        }
        create_dir(dest, COPY_DIR_MODE, false)?;
    }

    for path in sorted_entries(source)? {
        let target = dest.join(file_name(&path));
        if path.is_dir() {
            copy_tree_inner(&path, &target, txn.as_deref_mut())?;
        } else {
            if !target.exists() {
                if let Some(t) = txn.as_deref_mut() {
                    t.record_file(&target);
                }
            }
            fs::copy(&path, &target).map_err(|source| FsError::Copy {
                from: path.clone(),
                to: target.clone(),
                source,
            })?;
        }
    }

    Ok(())
}

/// Merges the tree under `source` into `dest` by renaming files.
///
/// Destination parents are created with mode 0777 and pre-existing
/// destination files are replaced. The first failure aborts the merge;
/// files already moved stay in `dest` and the rest stay in `source`, so
/// re-running the merge picks up where it stopped. On success the emptied
/// source tree is removed, along with `archive` when given.
pub fn move_tree(source: &Path, dest: &Path, archive: Option<&Path>) -> Result<(), FsError> {
    let entries = rglob(&source.join("*"), &[])?;
    if entries.is_empty() {
        return Err(FsError::EmptySource(source.to_path_buf()));
    }

    debug!(
        "[ADDON-DIR] Moving {} entries from {:?} to {:?}",
        entries.len(),
        source,
        dest
    );

    for entry in entries {
        let Ok(relative) = entry.strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);

        if let Some(parent) = target.parent() {
            if !parent.exists() {
                create_dir(parent, MOVE_DIR_MODE, true)?;
            }
        }

        if entry.exists() && !is_writable(&entry) {
            return Err(FsError::NotWritable(entry));
        }
        if target.exists() && !is_writable(&target) {
            return Err(FsError::NotWritable(target));
        }

        if entry.is_dir() {
            if !target.exists() {
                create_dir(&target, MOVE_DIR_MODE, true)?;
            }
        } else {
            if target.exists() {
                fs::remove_file(&target).map_err(|source| FsError::Remove {
                    path: target.clone(),
                    source,
                })?;
            }
            fs::rename(&entry, &target).map_err(|source| FsError::Rename {
                from: entry.clone(),
                to: target.clone(),
                source,
            })?;
        }
    }

    delete_tree(source)?;

    if let Some(archive) = archive {
        if let Err(e) = fs::remove_file(archive) {
            warn!("[ADDON-DIR] Could not remove archive {:?}: {}", archive, e);
        }
    }

    Ok(())
}

/// Recursively deletes `dir`.
pub fn delete_tree(dir: &Path) -> Result<(), FsError> {
    if !dir.is_dir() {
        return Err(FsError::NotADirectory(dir.to_path_buf()));
    }
    fs::remove_dir_all(dir).map_err(|source| FsError::Remove {
        path: dir.to_path_buf(),
        source,
    })
}

/// Removes `dir` only when it is an empty directory.
///
/// Returns whether it was removed. Missing and non-empty directories are
/// skipped silently.
pub fn delete_tree_if_empty(dir: &Path) -> Result<bool, FsError> {
    if !dir.is_dir() || !is_empty(dir)? {
        return Ok(false);
    }
    fs::remove_dir(dir).map_err(|source| FsError::Remove {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(true)
}

/// Returns true when `dir` has no entries.
pub fn is_empty(dir: &Path) -> Result<bool, FsError> {
    let mut entries = fs::read_dir(dir).map_err(|source| FsError::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(entries.next().is_none())
}

/// Returns true when `path` exists and carries a write permission bit.
#[must_use]
pub fn is_writable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

/// Reads `dir` and returns its entry paths sorted by name.
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, FsError> {
    let read = fs::read_dir(dir).map_err(|source| FsError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in read {
        let entry = entry.map_err(|source| FsError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Creates a directory with the given permission bits on Unix.
pub(crate) fn create_dir(path: &Path, mode: u32, recursive: bool) -> Result<(), FsError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(recursive);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    builder.create(path).map_err(|source| FsError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    #[test]
    fn test_list_puts_directories_first() {
        let dir = TempDir::new().expect("temp dir");
        touch(&dir.path().join("a.txt"), "a");
        fs::create_dir(dir.path().join("zeta")).expect("mkdir");
        touch(&dir.path().join("b.txt"), "b");

        let names: Vec<_> = list(dir.path())
            .expect("list")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["zeta", "a.txt", "b.txt"]);
    }

    #[test]
    fn test_rglob_missing_directory_is_empty() {
        let dir = TempDir::new().expect("temp dir");
        let found = rglob(&dir.path().join("nope").join("*"), &[]).expect("rglob");
        assert!(found.is_empty());
    }

    #[test]
    fn test_rglob_filters_by_leaf_pattern() {
        let dir = TempDir::new().expect("temp dir");
        touch(&dir.path().join("one.php"), "");
        touch(&dir.path().join("two.txt"), "");
        touch(&dir.path().join("sub").join("three.php"), "");

        let found = rglob(&dir.path().join("*.php"), &[]).expect("rglob");
        assert_eq!(
            found,
            vec![dir.path().join("one.php"), dir.path().join("sub").join("three.php")]
        );
    }

    #[test]
    fn test_copy_tree_requires_source() {
        let dir = TempDir::new().expect("temp dir");
        let err = copy_tree(&dir.path().join("missing"), &dir.path().join("out"))
            .expect_err("missing source");
        assert!(matches!(err, FsError::SourceMissing(_)));
    }

    #[test]
    fn test_copy_tree_tracked_records_only_new_paths() {
        let dir = TempDir::new().expect("temp dir");
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        touch(&src.join("keep.txt"), "new");
        touch(&src.join("nested").join("inner.txt"), "inner");
        touch(&dest.join("keep.txt"), "old");

        let mut txn = InstallTransaction::new("copy");
        copy_tree_tracked(&src, &dest, &mut txn).expect("copy");

        assert_eq!(fs::read_to_string(dest.join("keep.txt")).expect("read"), "new");
        assert_eq!(txn.len(), 2);

        txn.rollback();
        assert!(!dest.join("nested").exists());
        assert!(dest.join("keep.txt").exists());
    }

    #[test]
    fn test_delete_tree_rejects_non_directory() {
        let dir = TempDir::new().expect("temp dir");
        let err = delete_tree(&dir.path().join("ghost")).expect_err("not a dir");
        assert!(matches!(err, FsError::NotADirectory(_)));
    }

    #[test]
    fn test_delete_tree_if_empty_skips_non_empty() {
        let dir = TempDir::new().expect("temp dir");
        let full = dir.path().join("full");
        let empty = dir.path().join("empty");
        touch(&full.join("x"), "x");
        fs::create_dir(&empty).expect("mkdir");

        assert!(!delete_tree_if_empty(&full).expect("full"));
        assert!(delete_tree_if_empty(&empty).expect("empty"));
        assert!(!delete_tree_if_empty(&empty).expect("gone"));
        assert!(full.exists());
        assert!(!empty.exists());
    }

    #[test]
    fn test_move_tree_rejects_empty_source() {
        let dir = TempDir::new().expect("temp dir");
        let src = dir.path().join("src");
        fs::create_dir(&src).expect("mkdir");
        let err = move_tree(&src, &dir.path().join("dest"), None).expect_err("empty");
        assert!(matches!(err, FsError::EmptySource(_)));
    }

    #[test]
    fn test_move_tree_removes_archive() {
        let dir = TempDir::new().expect("temp dir");
        let src = dir.path().join("src");
        let archive = dir.path().join("pkg.zip");
        touch(&src.join("a.txt"), "a");
        touch(&archive, "zip");

        move_tree(&src, &dir.path().join("dest"), Some(&archive)).expect("move");
        assert!(!archive.exists());
        assert!(!src.exists());
        assert!(dir.path().join("dest").join("a.txt").exists());
    }
}
