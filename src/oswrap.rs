// src/oswrap.rs

//! Filesystem helpers for Windows quirks
//!
//! Two behaviors live here: the `\\?\` long-path escape needed for
//! destinations deeper than 255 characters, and the rename fallback for
//! files Windows refuses to delete because another process holds them open.
//! On other platforms both reduce to plain std calls.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Return `path` in a form safe for deep trees.
///
/// Windows caps classic paths at 260 chars unless they carry the `\\?\`
/// prefix; paths that already have it, or relative paths, are left alone.
#[cfg(windows)]
pub fn longpath(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with(r"\\?\") || !path.is_absolute() {
        return path.to_path_buf();
    }
    PathBuf::from(format!(r"\\?\{}", s.replace('/', r"\")))
}

#[cfg(not(windows))]
pub fn longpath(path: &Path) -> PathBuf {
    path.to_path_buf()
}

/// `create_dir_all` through the long-path escape.
pub fn mkdir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(longpath(path))?;
    Ok(())
}

/// Remove a file or empty directory. If removal of a file fails (a process
/// holds it open, which Windows treats as a sharing violation), rename it to
/// a `.old` temp name beside itself so the path can be reused; returns the
/// new name in that case.
pub fn remove_or_rename(path: &Path) -> Result<Option<PathBuf>> {
    let lp = longpath(path);
    let meta = match fs::symlink_metadata(&lp) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let rm_err = if meta.is_dir() {
        match fs::remove_dir(&lp) {
            Ok(()) => return Ok(None),
            Err(e) => e,
        }
    } else {
        match fs::remove_file(&lp) {
            Ok(()) => return Ok(None),
            Err(e) => e,
        }
    };
    if rm_err.kind() == std::io::ErrorKind::NotFound {
        return Ok(None);
    }
    if meta.is_dir() {
        return Err(rm_err.into());
    }

    let mut new_name;
    let mut n = 0u32;
    loop {
        new_name = path.with_extension(format!("old.{}", n));
        if !new_name.exists() {
            break;
        }
        n += 1;
    }
    fs::rename(&lp, longpath(&new_name))?;
    debug!("renamed busy file {} to {}", path.display(), new_name.display());
    Ok(Some(new_name))
}
