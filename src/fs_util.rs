use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;
use zip::ZipArchive;

use crate::error::CatalogError;

pub fn is_zip_path(path: &Utf8Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Extracts `archive` into a sibling directory named after its stem and
/// returns that directory. A previous extraction is replaced as a whole.
pub fn unzip_to_folder(archive: &Utf8Path) -> Result<Utf8PathBuf, CatalogError> {
    if !archive.as_std_path().is_file() {
        return Err(CatalogError::Filesystem(format!("archive not found: {archive}")));
    }
    if !is_zip_path(archive) {
        return Err(CatalogError::NotAnArchive(archive.as_std_path().to_path_buf()));
    }
    let stem = archive
        .file_stem()
        .ok_or_else(|| CatalogError::NotAnArchive(archive.as_std_path().to_path_buf()))?;
    let parent = archive
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let destination = parent.join(stem);

    let staging = tempfile::Builder::new()
        .prefix(".ridan-catalog-unzip")
        .tempdir_in(parent.as_std_path())
        .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    extract_zip(archive.as_std_path(), staging.path())?;
    replace_dir(staging.path(), destination.as_std_path())
        .map_err(|err| CatalogError::Filesystem(format!("move into {destination}: {err}")))?;
    debug!(archive = %archive, destination = %destination, "archive extracted");
    Ok(destination)
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), CatalogError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| CatalogError::Archive(format!("open {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| CatalogError::Archive(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| CatalogError::Archive(err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(CatalogError::Archive(format!(
                "entry escapes extraction directory: {}",
                entry.name()
            )));
        };
        let entry_path = target_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
            continue;
        }
        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| CatalogError::Archive(format!("{}: {err}", entry_path.display())))?;
    }
    Ok(())
}

/// Regular files under `root`, recursively, sorted by path.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir)
            .map_err(|err| CatalogError::Filesystem(format!("read {}: {err}", dir.display())))?;
        for entry in entries {
            let path = entry
                .map_err(|err| CatalogError::Filesystem(err.to_string()))?
                .path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn replace_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}
