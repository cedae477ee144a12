// src/archive.rs

//! Goo archive reading and writing
//!
//! A goo package is a gzip-compressed tar stream holding exactly one
//! `<name>.pkgspec` entry (the JSON manifest) next to the installable
//! payload. This module extracts specs and payloads, computes streaming
//! checksums, and builds archives for the packaging path and tests.

use crate::error::{Error, Result};
use crate::goospec::PackageSpec;
use crate::oswrap;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// Read a gzip+tar stream and return the first embedded `.pkgspec`,
/// parsed as JSON.
pub fn extract_spec<R: Read>(reader: R) -> Result<PackageSpec> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        let is_spec = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(".pkgspec"))
            .unwrap_or(false);
        if is_spec {
            let spec: PackageSpec = serde_json::from_reader(entry)
                .map_err(|e| Error::InvalidSpec(e.to_string()))?;
            return Ok(spec);
        }
    }
    Err(Error::InvalidSpec("no pkgspec entry in archive".to_string()))
}

/// `extract_spec` from an archive on disk.
pub fn extract_spec_from_file(path: &Path) -> Result<PackageSpec> {
    extract_spec(File::open(oswrap::longpath(path))?)
}

/// Extract the whole archive into a directory named after the archive minus
/// its extension, preserving file modes. Returns the extraction directory.
pub fn extract_all(path: &Path) -> Result<PathBuf> {
    let dir = path.with_extension("");
    debug!("extracting {} to {}", path.display(), dir.display());
    oswrap::mkdir_all(&dir)?;
    let mut archive = Archive::new(GzDecoder::new(File::open(oswrap::longpath(path))?));
    archive.set_preserve_permissions(true);
    archive.unpack(oswrap::longpath(&dir))?;
    Ok(dir)
}

/// Extract a single named member into `dir`, creating it as needed.
/// Returns the extracted file path.
pub fn extract_member(path: &Path, member: &str, dir: &Path) -> Result<PathBuf> {
    let want = Path::new(member);
    let mut archive = Archive::new(GzDecoder::new(File::open(oswrap::longpath(path))?));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if &*entry.path()? != want {
            continue;
        }
        let dst = dir.join(member);
        if let Some(parent) = dst.parent() {
            oswrap::mkdir_all(parent)?;
        }
        let mut f = File::create(oswrap::longpath(&dst))?;
        io::copy(&mut entry, &mut f)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(mode) = entry.header().mode() {
                f.set_permissions(std::fs::Permissions::from_mode(mode))?;
            }
        }
        return Ok(dst);
    }
    Err(Error::NotFound(format!(
        "member {:?} in {}",
        member,
        path.display()
    )))
}

/// Sha256 of an entire stream, as lowercase hex.
pub fn checksum<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Sha256 of a file's contents.
pub fn checksum_file(path: &Path) -> Result<String> {
    checksum(File::open(oswrap::longpath(path))?)
}

/// Build a goo archive for `spec` in `out_dir`. `payload` maps
/// archive-relative names to contents; the `<name>.pkgspec` entry is
/// appended last, the way the packaging tool writes it.
pub fn create_package(
    spec: &PackageSpec,
    payload: &[(&str, &[u8])],
    out_dir: &Path,
) -> Result<PathBuf> {
    let out = out_dir.join(format!("{}.goo", spec));
    let f = File::create(&out)?;
    let gw = GzEncoder::new(f, Compression::default());
    let mut tw = tar::Builder::new(gw);

    for (name, content) in payload {
        append_entry(&mut tw, name, content)?;
    }
    let spec_json = serde_json::to_vec(spec)?;
    append_entry(&mut tw, &format!("{}.pkgspec", spec.name), &spec_json)?;

    let gw = tw.into_inner()?;
    let mut f = gw.finish()?;
    f.flush()?;
    Ok(out)
}

fn append_entry<W: Write>(tw: &mut tar::Builder<W>, name: &str, content: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tw.append_data(&mut header, name, content)?;
    Ok(())
}
