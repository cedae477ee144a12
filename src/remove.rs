// src/remove.rs

//! Package removal
//!
//! Removal works leaves-first: the closure of installed packages that
//! transitively depend on the target is computed up front, then each member
//! is uninstalled (script, files, database row) starting from the packages
//! nothing else depends on. A failing uninstall script aborts the
//! remainder; rows already removed stay removed.

use crate::archive;
use crate::cancel::CancelToken;
use crate::db::GooDb;
use crate::error::{Error, Result};
use crate::goospec::{GooGetState, PackageInfo, PackageState};
use crate::oswrap;
use crate::system::System;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The removal closure for `pi`: the target and every installed package
/// transitively depending on it (by name), ordered dependents-first so the
/// target comes last.
pub fn enumerate_deps(pi: &PackageInfo, state: &GooGetState) -> Vec<PackageInfo> {
    let mut order = Vec::new();
    let mut visited = Vec::new();
    visit(&pi.name, state, &mut visited, &mut order);
    order
}

fn visit(name: &str, state: &GooGetState, visited: &mut Vec<String>, order: &mut Vec<PackageInfo>) {
    if visited.iter().any(|v| v == name) {
        return;
    }
    visited.push(name.to_string());
    for ps in state {
        let spec = &ps.package_spec;
        if spec.pkg_dependencies.contains_key(name) {
            visit(&spec.name, state, visited, order);
        }
    }
    if let Some(ps) = state.iter().find(|ps| ps.package_spec.name == name) {
        order.push(ps.package_spec.info());
    }
}

/// Remove every package in `order`, script first, then files, then the
/// database row.
pub fn remove_all(
    cancel: &CancelToken,
    order: &[PackageInfo],
    db_only: bool,
    system: &dyn System,
    db: &mut GooDb,
) -> Result<()> {
    for pi in order {
        remove_package(cancel, pi, db_only, system, db)?;
    }
    Ok(())
}

/// Remove a single installed package without touching its dependents.
pub fn remove_package(
    cancel: &CancelToken,
    pi: &PackageInfo,
    db_only: bool,
    system: &dyn System,
    db: &mut GooDb,
) -> Result<()> {
    cancel.check()?;
    let want = PackageInfo::new(&pi.name, &pi.arch, "");
    let ps = match db
        .fetch_pkgs(&pi.name)?
        .iter()
        .find(|ps| ps.matches(&want))
        .cloned()
    {
        Some(ps) => ps,
        None => {
            warn!("package {} not installed, nothing to remove", pi.name);
            return Ok(());
        }
    };
    let spec = &ps.package_spec;
    info!("removing {}", spec);

    if !db_only {
        run_uninstall(&ps, system)?;
        delete_files(&ps);
    }
    db.remove_pkg(&spec.name, &spec.arch)?;
    Ok(())
}

/// Run the package's pre-uninstall and uninstall commands from its
/// extraction directory, re-extracting the cached archive when the
/// directory is gone.
fn run_uninstall(ps: &PackageState, system: &dyn System) -> Result<()> {
    let spec = &ps.package_spec;
    if spec.uninstall.path.is_empty() && spec.pre_uninstall.path.is_empty() {
        return Ok(());
    }

    let mut dir = PathBuf::from(&ps.unpack_dir);
    if !dir.exists() {
        let local = Path::new(&ps.local_path);
        if local.exists() {
            dir = archive::extract_all(local)?;
        } else {
            warn!(
                "archive for {} missing, skipping uninstall script",
                spec
            );
            return Ok(());
        }
    }

    let code = system.uninstall(&dir, ps)?;
    if !spec.uninstall.accepts(code) && !spec.pre_uninstall.accepts(code) {
        return Err(Error::UninstallScriptFailed {
            pkg: spec.info().pkg_name(),
            code,
        });
    }
    Ok(())
}

/// Delete the files recorded at install time: files first, then directories
/// bottom-up. A directory still holding foreign files is left alone.
fn delete_files(ps: &PackageState) {
    let mut dirs = Vec::new();
    for (path, digest) in &ps.installed_files {
        if digest.is_empty() {
            dirs.push(path.clone());
            continue;
        }
        if let Err(e) = oswrap::remove_or_rename(Path::new(path)) {
            warn!("unable to remove {}: {}", path, e);
        }
    }
    // Deepest directories first.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.len()));
    for dir in dirs {
        match std::fs::remove_dir(oswrap::longpath(Path::new(&dir))) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(_) => info!("directory {} not empty, leaving in place", dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goospec::PackageSpec;
    use std::collections::BTreeMap;

    fn state_with(specs: Vec<(&str, &str, Vec<(&str, &str)>)>) -> GooGetState {
        specs
            .into_iter()
            .map(|(name, ver, deps)| PackageState {
                package_spec: PackageSpec {
                    name: name.to_string(),
                    arch: "noarch".to_string(),
                    version: ver.to_string(),
                    pkg_dependencies: deps
                        .into_iter()
                        .map(|(n, v)| (n.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_enumerate_simple() {
        let state = state_with(vec![("a_pkg", "1", vec![]), ("b_pkg", "2", vec![])]);
        let order = enumerate_deps(&PackageInfo::new("a_pkg", "noarch", ""), &state);
        let names: Vec<&str> = order.iter().map(|pi| pi.name.as_str()).collect();
        assert_eq!(names, vec!["a_pkg"]);
    }

    #[test]
    fn test_enumerate_direct_dependents() {
        let state = state_with(vec![
            ("a_pkg", "10", vec![("d_pkg", "4")]),
            ("b_pkg", "2", vec![("a_pkg", "2")]),
            ("c_pkg", "3", vec![("a_pkg", "10")]),
            ("d_pkg", "4", vec![]),
        ]);
        let order = enumerate_deps(&PackageInfo::new("a_pkg", "noarch", ""), &state);
        let names: Vec<&str> = order.iter().map(|pi| pi.name.as_str()).collect();
        // b and c fall with a; d (a's own dependency) stays.
        assert_eq!(names.len(), 3);
        assert_eq!(names.last(), Some(&"a_pkg"));
        assert!(names.contains(&"b_pkg"));
        assert!(names.contains(&"c_pkg"));
    }

    #[test]
    fn test_enumerate_chain_is_leaves_first() {
        let state = state_with(vec![
            ("a_pkg", "10", vec![]),
            ("b_pkg", "2", vec![("a_pkg", "1")]),
            ("c_pkg", "3", vec![("b_pkg", "1")]),
            ("d_pkg", "4", vec![("c_pkg", "1")]),
        ]);
        let order = enumerate_deps(&PackageInfo::new("a_pkg", "noarch", ""), &state);
        let names: Vec<&str> = order.iter().map(|pi| pi.name.as_str()).collect();
        assert_eq!(names, vec!["d_pkg", "c_pkg", "b_pkg", "a_pkg"]);
    }

    #[test]
    fn test_enumerate_not_installed() {
        let state = state_with(vec![("a_pkg", "1", vec![])]);
        let order = enumerate_deps(&PackageInfo::new("zzz", "noarch", ""), &state);
        assert!(order.is_empty());
    }

    #[test]
    fn test_delete_files_keeps_shared_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let owned = dir.path().join("owned.txt");
        let foreign = dir.path().join("foreign.txt");
        std::fs::write(&owned, b"x").unwrap();
        std::fs::write(&foreign, b"y").unwrap();

        let ps = PackageState {
            installed_files: BTreeMap::from([
                (owned.to_string_lossy().to_string(), "digest".to_string()),
                (dir.path().to_string_lossy().to_string(), String::new()),
            ]),
            ..Default::default()
        };
        delete_files(&ps);
        assert!(!owned.exists());
        // The directory still holds a foreign file, so it survives.
        assert!(foreign.exists());
        assert!(dir.path().exists());
    }
}
