//! Zip extraction and packing.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Archive failures.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// IO error while reading or writing.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Zip container is corrupt or unsupported.
    #[error("failed to read archive {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Entry name escapes the destination directory.
    #[error("archive entry '{0}' escapes the extraction directory")]
    UnsafeEntry(String),

    /// Packing failed.
    #[error("failed to pack {}: {reason}", path.display())]
    Pack { path: PathBuf, reason: String },
}

/// Extracts every entry of `archive` under `dest`, creating `dest` if
/// needed. Returns the number of files written.
pub fn extract(archive: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(|e| ArchiveError::Corrupt {
        path: archive.to_path_buf(),
        reason: e.to_string(),
    })?;

    fs::create_dir_all(dest)?;
    let mut written = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| ArchiveError::Corrupt {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })?;

        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_string()))?;
        let outpath = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        io::copy(&mut entry, &mut outfile)?;
        written += 1;
    }

    Ok(written)
}

/// Zips the tree under `source` into `dest`, paths relative to `source`.
pub fn pack_dir(source: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    if !source.is_dir() {
        return Err(ArchiveError::Pack {
            path: source.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    let file = File::create(dest)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut count = 0;

    add_dir(&mut writer, source, source, options, &mut count)?;

    writer.finish().map_err(|e| ArchiveError::Pack {
        path: dest.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(count)
}

fn add_dir(
    writer: &mut ZipWriter<File>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
    count: &mut usize,
) -> Result<(), ArchiveError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    entries.sort();

    for path in entries {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let pack_err = |e: zip::result::ZipError| ArchiveError::Pack {
            path: path.clone(),
            reason: e.to_string(),
        };

        if path.is_dir() {
            writer.add_directory(format!("{}/", name), options).map_err(pack_err)?;
            add_dir(writer, root, &path, options, count)?;
        } else {
            writer.start_file(name, options).map_err(pack_err)?;
            writer.write_all(&fs::read(&path)?)?;
            *count += 1;
        }
    }

    Ok(())
}
