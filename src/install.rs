// src/install.rs

//! Package installation
//!
//! Applies resolver output: download with checksum verification, archive
//! extraction, file placement with per-file digests, install script
//! invocation, state database updates, replacement removal, and stale-file
//! cleanup. No database row is written until the archive is fully extracted
//! and the install script has succeeded, so cancellation or failure at any
//! point leaves no half-installed record.

use crate::archive;
use crate::cancel::CancelToken;
use crate::db::GooDb;
use crate::download::{self, Downloader};
use crate::error::{Error, Result};
use crate::goospec::{
    GooGetState, InstalledApp, PackageInfo, PackageSpec, PackageState, RepoMap, RepoSpec,
};
use crate::oswrap;
use crate::remove;
use crate::resolver;
use crate::system::System;
use crate::version;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// What an install request amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum InstallOutcome {
    Installed(PackageInfo),
    AlreadyInstalled(PackageInfo),
}

/// Drives installs for one invocation.
pub struct Installer<'a> {
    pub db: &'a mut GooDb,
    pub system: &'a dyn System,
    pub downloader: &'a Downloader,
    pub cache_dir: PathBuf,
    pub archs: Vec<String>,
    /// Mutate only the database, skipping files and scripts.
    pub db_only: bool,
    /// Ignore cached archives when reinstalling.
    pub redownload: bool,
    /// Names currently being installed, for cycle protection.
    in_flight: Vec<String>,
}

impl<'a> Installer<'a> {
    pub fn new(
        db: &'a mut GooDb,
        system: &'a dyn System,
        downloader: &'a Downloader,
        cache_dir: PathBuf,
        archs: Vec<String>,
    ) -> Self {
        Installer {
            db,
            system,
            downloader,
            cache_dir,
            archs,
            db_only: false,
            redownload: false,
            in_flight: Vec::new(),
        }
    }

    /// Install `pkg` (a `name`, `name.arch`, or `name.arch.version` string)
    /// from the repos in `rm`.
    pub fn install(
        &mut self,
        cancel: &CancelToken,
        pkg: &str,
        rm: &RepoMap,
        reinstall: bool,
    ) -> Result<InstallOutcome> {
        let mut pi = PackageInfo::split(pkg);
        if pi.name.is_empty() {
            return Err(Error::InvalidPackageName(pkg.to_string()));
        }

        if reinstall {
            let ps = self.db.fetch_pkg(&pi.name)?.ok_or_else(|| {
                Error::NotFound(format!("package {}, cannot reinstall", pi.name))
            })?;
            let info = ps.package_spec.info();
            self.reinstall(cancel, ps)?;
            return Ok(InstallOutcome::Installed(info));
        }

        if pi.ver.is_empty() {
            let (ver, _, arch) = resolver::find_repo_latest(&pi, rm, &self.archs)?;
            pi.ver = ver;
            if pi.arch.is_empty() {
                pi.arch = arch;
            }
        }
        version::Version::parse(&pi.ver)?;
        let repo = resolver::what_repo(&pi, rm)?;

        let state = self.db.fetch_pkgs("")?;
        if !resolver::needs_installation(&pi, &state)? {
            return Ok(InstallOutcome::AlreadyInstalled(pi));
        }
        self.from_repo(cancel, &pi, &repo, rm)?;
        Ok(InstallOutcome::Installed(pi))
    }

    /// Install the exact package `pi` from `repo`, dependencies first.
    pub fn from_repo(
        &mut self,
        cancel: &CancelToken,
        pi: &PackageInfo,
        repo: &str,
        rm: &RepoMap,
    ) -> Result<()> {
        cancel.check()?;
        if self.in_flight.contains(&pi.name) {
            return Err(Error::DependencyCycle(pi.name.clone()));
        }
        let rs = resolver::find_repo_spec(
            pi,
            rm.get(repo)
                .ok_or_else(|| Error::NotFound(format!("repo {}", repo)))?,
        )?;

        let state = self.db.fetch_pkgs("")?;
        resolver::resolve_conflicts(&rs.package_spec, &state)?;

        self.in_flight.push(pi.name.clone());
        let res = match self.install_deps(cancel, &rs.package_spec, repo, rm) {
            Ok(()) => self.install_one(cancel, &rs, repo),
            Err(e) => Err(e),
        };
        self.in_flight.pop();
        res
    }

    /// Install a package from a local goo file, without repo context.
    /// Dependencies must already be satisfied by the installed state.
    pub fn from_disk(
        &mut self,
        cancel: &CancelToken,
        path: &Path,
        reinstall: bool,
    ) -> Result<InstallOutcome> {
        cancel.check()?;
        let spec = archive::extract_spec_from_file(path)?;
        spec.validate()?;
        let pi = spec.info();

        let state = self.db.fetch_pkgs("")?;
        if !reinstall && !resolver::needs_installation(&pi, &state)? {
            return Ok(InstallOutcome::AlreadyInstalled(pi));
        }
        resolver::resolve_conflicts(&spec, &state)?;
        for (name, min_ver) in &spec.pkg_dependencies {
            let dep = PackageInfo::new(name, "", min_ver);
            if !resolver::is_satisfied(&dep, &state)? {
                return Err(Error::DependencyUnresolved(format!(
                    "{} version {} or greater not installed",
                    name, min_ver
                )));
            }
        }

        // The archive is copied into the cache so later reinstall, verify,
        // and remove operations can find it.
        oswrap::mkdir_all(&self.cache_dir)?;
        let dst = self.cache_dir.join(format!("{}.goo", pi.pkg_name()));
        if path != dst {
            fs::copy(oswrap::longpath(path), oswrap::longpath(&dst))?;
        }

        let rs = RepoSpec {
            checksum: String::new(),
            source: String::new(),
            package_spec: spec,
        };
        self.finish_install(cancel, &rs, "", String::new(), &dst, &state)?;
        Ok(InstallOutcome::Installed(pi))
    }

    /// Reinstall an already-installed package from its recorded archive,
    /// redownloading when asked or when the cached copy is bad.
    pub fn reinstall(&mut self, cancel: &CancelToken, ps: PackageState) -> Result<()> {
        cancel.check()?;
        let pi = ps.package_spec.info();
        info!("reinstalling {}", pi);

        let dst = PathBuf::from(&ps.local_path);
        if ps.download_url.is_empty() {
            if !dst.exists() {
                return Err(Error::NotFound(format!("local archive for {}", pi)));
            }
        } else {
            self.ensure_archive(cancel, &ps.download_url, &dst, &ps.checksum, self.redownload)?;
        }

        let rs = RepoSpec {
            checksum: ps.checksum.clone(),
            source: String::new(),
            package_spec: ps.package_spec.clone(),
        };
        let state = self.db.fetch_pkgs("")?;
        self.finish_install(cancel, &rs, &ps.source_repo, ps.download_url.clone(), &dst, &state)
    }

    fn install_deps(
        &mut self,
        cancel: &CancelToken,
        spec: &PackageSpec,
        repo: &str,
        rm: &RepoMap,
    ) -> Result<()> {
        for (name, min_ver) in &spec.pkg_dependencies {
            let dep = PackageInfo::new(name, "", min_ver);
            let state = self.db.fetch_pkgs("")?;
            if resolver::is_satisfied(&dep, &state)? {
                info!("dependency {} of {} already satisfied", name, spec.name);
                continue;
            }
            let (ver, dep_repo, arch) = resolver::find_dep_latest(&dep, rm, &self.archs, repo)
                .map_err(|_| unresolved(name, min_ver))?;
            if !min_ver.is_empty() && !version::satisfies(&ver, min_ver)? {
                return Err(unresolved(name, min_ver));
            }
            let dep_pi = PackageInfo::new(name, &arch, &ver);
            info!("installing dependency {} of {}", dep_pi, spec.name);
            self.from_repo(cancel, &dep_pi, &dep_repo, rm)?;
        }
        Ok(())
    }

    fn install_one(&mut self, cancel: &CancelToken, rs: &RepoSpec, repo: &str) -> Result<()> {
        let pi = rs.package_spec.info();
        let dst = self.cache_dir.join(format!("{}.goo", pi.pkg_name()));
        let url = download::resolve_source(&rs.source, repo);
        self.ensure_archive(cancel, &url, &dst, &rs.checksum, false)?;

        let state = self.db.fetch_pkgs("")?;
        self.finish_install(cancel, rs, repo, url, &dst, &state)
    }

    /// Shared tail of every install path: extract, place files, run the
    /// install script, commit state, remove replaced packages, clean stale
    /// files.
    fn finish_install(
        &mut self,
        cancel: &CancelToken,
        rs: &RepoSpec,
        repo: &str,
        url: String,
        dst: &Path,
        state: &GooGetState,
    ) -> Result<()> {
        let pi = rs.package_spec.info();
        let old = state
            .package_state(&PackageInfo::new(&pi.name, &pi.arch, ""))
            .cloned();

        let unpack_dir;
        let installed_files;
        let spec;
        if self.db_only {
            unpack_dir = dst.with_extension("");
            installed_files = BTreeMap::new();
            spec = rs.package_spec.clone();
        } else {
            unpack_dir = archive::extract_all(dst)?;
            let disk_spec = archive::extract_spec_from_file(dst)?;
            if disk_spec.name != rs.package_spec.name
                || disk_spec.arch != rs.package_spec.arch
                || disk_spec.version != rs.package_spec.version
            {
                return Err(Error::InvalidSpec(format!(
                    "embedded spec {} does not match expected {}",
                    disk_spec, rs.package_spec
                )));
            }
            cancel.check()?;
            installed_files = install_pkg(&unpack_dir, &disk_spec)?;
            let code = self.system.install(&unpack_dir, &disk_spec)?;
            if !disk_spec.install.accepts(code) {
                return Err(Error::InstallScriptFailed {
                    pkg: pi.pkg_name(),
                    code,
                });
            }
            spec = disk_spec;
        }

        let (app_name, app_reg) = self
            .system
            .app_association(&spec, &dst.to_string_lossy());
        let ps = PackageState {
            source_repo: repo.to_string(),
            download_url: url,
            checksum: rs.checksum.clone(),
            local_path: dst.to_string_lossy().to_string(),
            unpack_dir: unpack_dir.to_string_lossy().to_string(),
            package_spec: spec.clone(),
            installed_files: installed_files.clone(),
            installed_app: InstalledApp {
                name: app_name,
                reg: app_reg,
            },
            install_date: unix_now(),
        };
        self.db.write_state_to_db(std::slice::from_ref(&ps))?;
        info!("installed {}", pi);

        // Replacement runs only after the new row is committed; dependents
        // of the replaced package are left alone.
        for replaced in resolver::replaced_packages(&spec, state) {
            if replaced.name == pi.name && replaced.arch == pi.arch {
                continue;
            }
            info!("removing replaced package {}", replaced);
            remove::remove_package(cancel, &replaced, self.db_only, self.system, self.db)?;
        }

        if let Some(old) = old {
            if !self.db_only {
                clean_old_files(&old, &installed_files);
            }
        }
        Ok(())
    }

    /// Make sure `dst` holds an archive matching `checksum`: reuse a valid
    /// cached copy, re-fetch a corrupt one, always fetch when forced.
    fn ensure_archive(
        &self,
        cancel: &CancelToken,
        url: &str,
        dst: &Path,
        checksum: &str,
        force_redownload: bool,
    ) -> Result<()> {
        if !force_redownload && dst.exists() {
            if checksum.is_empty() || archive::checksum_file(dst)?.eq_ignore_ascii_case(checksum) {
                info!("using cached archive {}", dst.display());
                return Ok(());
            }
            info!("cached archive {} fails checksum, refetching", dst.display());
        }
        self.downloader.package(cancel, url, dst, checksum)
    }
}

fn unresolved(name: &str, min_ver: &str) -> Error {
    Error::DependencyUnresolved(format!(
        "{} version {} or greater not installed and not available in any repo",
        name, min_ver
    ))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Expand an env placeholder at the beginning of a files destination
/// (`<VAR>/rest`); embedded `<...>` stays literal. Destinations without a
/// placeholder are made absolute.
pub fn resolve_dst(dst: &str) -> String {
    if let Some(rest) = dst.strip_prefix('<') {
        if let Some(i) = rest.find('>') {
            let val = std::env::var(&rest[..i]).unwrap_or_default();
            return format!("{}{}", val, &rest[i + 1..]);
        }
    }
    if Path::new(dst).is_absolute() {
        dst.to_string()
    } else {
        format!("/{}", dst)
    }
}

/// Place the extracted payload according to the spec's files mapping.
/// Returns the installed-files map: absolute path -> sha256 hex, or "" for
/// directories.
pub fn install_pkg(unpack_dir: &Path, spec: &PackageSpec) -> Result<BTreeMap<String, String>> {
    let mut installed = BTreeMap::new();
    for (src, dst) in &spec.files {
        let dst = resolve_dst(dst);
        let src_path = unpack_dir.join(src.trim_start_matches("./"));
        let meta = fs::metadata(oswrap::longpath(&src_path))?;
        if meta.is_dir() {
            copy_tree(&src_path, Path::new(&dst), &mut installed)?;
        } else {
            copy_file(&src_path, Path::new(&dst), &mut installed)?;
        }
    }
    Ok(installed)
}

fn copy_tree(
    src: &Path,
    dst: &Path,
    installed: &mut BTreeMap<String, String>,
) -> Result<()> {
    oswrap::mkdir_all(dst)?;
    installed.insert(dst.to_string_lossy().to_string(), String::new());

    let mut entries: Vec<_> =
        fs::read_dir(oswrap::longpath(src))?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name();
        let child_src = src.join(&name);
        let child_dst = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree(&child_src, &child_dst, installed)?;
        } else {
            copy_file(&child_src, &child_dst, installed)?;
        }
    }
    Ok(())
}

fn copy_file(src: &Path, dst: &Path, installed: &mut BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = dst.parent() {
        oswrap::mkdir_all(parent)?;
    }
    oswrap::remove_or_rename(dst)?;
    fs::copy(oswrap::longpath(src), oswrap::longpath(dst))?;
    let digest = archive::checksum_file(dst)?;
    installed.insert(dst.to_string_lossy().to_string(), digest);
    Ok(())
}

/// After an upgrade or reinstall, delete files from the previous
/// installation that the new one no longer owns. Directories are left in
/// place; deletion failures are logged, not fatal.
pub fn clean_old_files(old_state: &PackageState, new_files: &BTreeMap<String, String>) {
    for (path, digest) in &old_state.installed_files {
        if new_files.contains_key(path) || digest.is_empty() {
            continue;
        }
        if let Err(e) = oswrap::remove_or_rename(Path::new(path)) {
            warn!("unable to remove stale file {}: {}", path, e);
        }
    }
}
