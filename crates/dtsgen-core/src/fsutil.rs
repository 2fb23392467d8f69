//! Directory and file helpers used by the stages.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Create `path` and its parents. With `overwrite` any existing content is
/// removed first.
pub fn create_dir(path: &Path, overwrite: bool) -> io::Result<()> {
    if overwrite {
        remove_dir_all(path)?;
    }
    std::fs::create_dir_all(path)
}

/// Recursively copy `src` into `dst`, keeping symlinks as symlinks.
///
/// Existing files in `dst` are overwritten; `node_modules/.bin` in the
/// template project is full of relative links that must survive the copy.
pub fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                std::fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Write `content` to `path`, creating parent directories.
pub fn write_file(path: &Path, content: impl AsRef<[u8]>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

/// Entries of `dir` sorted by file name; empty when `dir` is not a directory.
pub fn children(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}

/// True unless `dir` is a directory with at least one entry.
pub fn dir_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// Whether `path` is a file with non-blank content.
pub fn file_nonempty(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|content| !content.trim().is_empty())
        .unwrap_or(false)
}

/// First of `path`, `stem_0.ext`, `stem_1.ext`, ... that does not exist yet.
pub fn unique_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, suffix) = match name.split_once('.') {
        Some((stem, suffix)) => (stem.to_string(), format!(".{suffix}")),
        None => (name.clone(), String::new()),
    };
    let mut candidate = path.to_path_buf();
    let mut index = 0;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{stem}_{index}{suffix}"));
        index += 1;
    }
    candidate
}

/// `std::fs::remove_dir_all` that treats a missing directory as removed.
pub fn remove_dir_all(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// `path` made absolute against the current directory. The path does not
/// have to exist, unlike with `canonicalize`.
pub fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}
