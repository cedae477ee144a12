// src/resolver.rs

//! Dependency and conflict resolution
//!
//! Given a root request and the union of repos, the resolver decides what
//! gets installed, skipped, replaced, or rejected: latest-version selection
//! across prioritized repos, the transitive dependency walk, satisfaction
//! checks against installed and provided packages, and conflict detection.
//! Resolution never touches the disk or network; all failures surface
//! before any side effect.

use crate::error::{Error, Result};
use crate::goospec::{GooGetState, PackageInfo, PackageSpec, Repo, RepoMap, RepoSpec};
use crate::version;
use std::collections::BTreeMap;
use tracing::warn;

/// Find the RepoSpec in `repo` whose PackageSpec exactly matches `pi`.
pub fn find_repo_spec(pi: &PackageInfo, repo: &Repo) -> Result<RepoSpec> {
    repo.packages
        .iter()
        .find(|rs| {
            let ps = &rs.package_spec;
            ps.name == pi.name && ps.arch == pi.arch && ps.version == pi.ver
        })
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("package {} in repo", pi)))
}

/// Return the URL of a repo containing exactly `pi`. All of name, arch, and
/// version must be set.
pub fn what_repo(pi: &PackageInfo, rm: &RepoMap) -> Result<String> {
    for (url, repo) in rm {
        if find_repo_spec(pi, repo).is_ok() {
            return Ok(url.clone());
        }
    }
    Err(Error::NotFound(format!("package {} in any repo", pi)))
}

/// Highest version of `name`/`arch` per repo, reduced to a single winner:
/// the repo with the highest priority wins; among equal priorities the repo
/// holding the highest version wins; a remaining version tie goes to the
/// lexicographically first repo URL.
fn latest_for_arch<'a>(
    name: &str,
    arch: &str,
    rm: &'a RepoMap,
    only_repo: Option<&str>,
) -> Option<(String, &'a str)> {
    let mut best: Option<(i32, version::Version, String, &str)> = None;
    for (url, repo) in rm {
        if let Some(only) = only_repo {
            if url != only {
                continue;
            }
        }
        for rs in &repo.packages {
            let ps = &rs.package_spec;
            if ps.name != name || ps.arch != arch {
                continue;
            }
            let ver = match version::Version::parse(&ps.version) {
                Ok(v) => v,
                Err(e) => {
                    warn!("skipping {} with bad version: {}", ps, e);
                    continue;
                }
            };
            let better = match &best {
                None => true,
                Some((prio, bv, _, _)) => {
                    repo.priority > *prio || (repo.priority == *prio && ver > *bv)
                }
            };
            if better {
                best = Some((repo.priority, ver, ps.version.clone(), url.as_str()));
            }
        }
    }
    best.map(|(_, _, ver, url)| (ver, url))
}

/// Latest-version selection: resolve `(name, maybe arch)` to a concrete
/// `(version, repo URL, arch)`.
///
/// A given arch restricts the search; otherwise the acceptable archs are
/// tried in preference order and the first with any candidate wins.
pub fn find_repo_latest(
    pi: &PackageInfo,
    rm: &RepoMap,
    archs: &[String],
) -> Result<(String, String, String)> {
    find_repo_latest_in(pi, rm, archs, None)
}

fn find_repo_latest_in(
    pi: &PackageInfo,
    rm: &RepoMap,
    archs: &[String],
    only_repo: Option<&str>,
) -> Result<(String, String, String)> {
    if !pi.arch.is_empty() {
        if let Some((ver, url)) = latest_for_arch(&pi.name, &pi.arch, rm, only_repo) {
            return Ok((ver, url.to_string(), pi.arch.clone()));
        }
        return Err(Error::NotFound(format!(
            "no versions of package {}.{} in any repo",
            pi.name, pi.arch
        )));
    }
    for arch in archs {
        if let Some((ver, url)) = latest_for_arch(&pi.name, arch, rm, only_repo) {
            return Ok((ver, url.to_string(), arch.clone()));
        }
    }
    Err(Error::NotFound(format!(
        "no versions of package {} in any repo",
        pi.name
    )))
}

/// Latest-version selection for a dependency: the root package's repo is
/// preferred, then all repos.
pub fn find_dep_latest(
    pi: &PackageInfo,
    rm: &RepoMap,
    archs: &[String],
    root_repo: &str,
) -> Result<(String, String, String)> {
    match find_repo_latest_in(pi, rm, archs, Some(root_repo)) {
        Ok(found) => Ok(found),
        Err(_) => find_repo_latest_in(pi, rm, archs, None),
    }
}

/// Split a provides entry of the form `name` or `name=version`.
fn split_provides(p: &str) -> (&str, Option<&str>) {
    match p.split_once('=') {
        Some((name, ver)) => (name, Some(ver)),
        None => (p, None),
    }
}

/// Whether the dependency `pi` (name, optional arch, minimum version) is
/// satisfied by the installed state, either by a real package at a
/// sufficient version or by a `provides` declaration.
pub fn is_satisfied(pi: &PackageInfo, state: &GooGetState) -> Result<bool> {
    for ps in state {
        let spec = &ps.package_spec;
        if spec.name == pi.name && (pi.arch.is_empty() || spec.arch == pi.arch) {
            if pi.ver.is_empty() || version::satisfies(&spec.version, &pi.ver)? {
                return Ok(true);
            }
        }
        for p in &spec.provides {
            let (name, ver) = split_provides(p);
            if name != pi.name {
                continue;
            }
            match ver {
                // A bare provides satisfies any version.
                None => return Ok(true),
                Some(v) => {
                    if pi.ver.is_empty() || version::satisfies(v, &pi.ver)? {
                        return Ok(true);
                    }
                }
            }
        }
    }
    Ok(false)
}

/// Whether the root request still needs work: false when `pi.name` is
/// installed (matching arch, if given) at a version >= the requested one.
pub fn needs_installation(pi: &PackageInfo, state: &GooGetState) -> Result<bool> {
    for ps in state {
        let spec = &ps.package_spec;
        if spec.name != pi.name || (!pi.arch.is_empty() && spec.arch != pi.arch) {
            continue;
        }
        if pi.ver.is_empty() || version::satisfies(&spec.version, &pi.ver)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Fail with `ConflictsWithInstalled` when anything in `spec.conflicts`
/// names an installed package or a virtual name an installed package
/// provides. Checked before any installation side effect.
pub fn resolve_conflicts(spec: &PackageSpec, state: &GooGetState) -> Result<()> {
    for conflict in &spec.conflicts {
        for ps in state {
            let installed = &ps.package_spec;
            let provided = installed
                .provides
                .iter()
                .any(|p| split_provides(p).0 == conflict);
            if &installed.name == conflict || provided {
                return Err(Error::ConflictsWithInstalled(conflict.clone()));
            }
        }
    }
    Ok(())
}

/// Installed packages whose identity appears in `spec.replaces`, matched by
/// `name.arch` (any version component in the replaces string is ignored).
pub fn replaced_packages(spec: &PackageSpec, state: &GooGetState) -> Vec<PackageInfo> {
    let mut out = Vec::new();
    for r in &spec.replaces {
        let ri = PackageInfo::split(r);
        for ps in state {
            let installed = &ps.package_spec;
            if installed.name == ri.name && installed.arch == ri.arch {
                out.push(installed.info());
            }
        }
    }
    out
}

/// One resolved step of a dependency walk: the concrete package and the
/// repo it comes from.
#[derive(Debug, Clone, PartialEq)]
pub struct DepInfo {
    pub pkg: PackageInfo,
    pub repo: String,
}

/// Walk the dependency graph from `pi`, producing a topologically ordered
/// list (dependencies before dependents, the root last).
///
/// Every package resolves against the root's repo first, then all repos.
/// A dependency reached along several paths must satisfy the greatest of
/// the declared minimum versions; cycles are an error.
pub fn list_deps(
    pi: &PackageInfo,
    rm: &RepoMap,
    repo: &str,
    archs: &[String],
) -> Result<Vec<DepInfo>> {
    let mut done: BTreeMap<String, DepInfo> = BTreeMap::new();
    let mut order = Vec::new();
    let mut path = Vec::new();
    walk(pi, rm, repo, archs, &mut done, &mut order, &mut path)?;
    Ok(order)
}

fn walk(
    pi: &PackageInfo,
    rm: &RepoMap,
    root_repo: &str,
    archs: &[String],
    done: &mut BTreeMap<String, DepInfo>,
    order: &mut Vec<DepInfo>,
    path: &mut Vec<String>,
) -> Result<()> {
    if path.iter().any(|p| p == &pi.name) {
        return Err(Error::DependencyCycle(pi.name.clone()));
    }
    if let Some(existing) = done.get(&pi.name) {
        // Already resolved along another path; the chosen (latest) version
        // must also satisfy this path's minimum.
        if pi.ver.is_empty() || version::satisfies(&existing.pkg.ver, &pi.ver)? {
            return Ok(());
        }
        return Err(Error::DependencyUnresolved(format!(
            "{}.{} version {} or greater not installed and not available in any repo",
            pi.name, existing.pkg.arch, pi.ver
        )));
    }

    let (ver, repo, arch) = match find_repo_latest_in(pi, rm, archs, Some(root_repo)) {
        Ok(found) => found,
        Err(_) => find_repo_latest_in(pi, rm, archs, None).map_err(|_| {
            Error::DependencyUnresolved(format!(
                "{}.{} version {} or greater not installed and not available in any repo",
                pi.name, pi.arch, pi.ver
            ))
        })?,
    };
    if !pi.ver.is_empty() && !version::satisfies(&ver, &pi.ver)? {
        return Err(Error::DependencyUnresolved(format!(
            "{}.{} version {} or greater not installed and not available in any repo",
            pi.name, arch, pi.ver
        )));
    }

    let resolved = PackageInfo::new(&pi.name, &arch, &ver);
    let spec = find_repo_spec(&resolved, &rm[&repo])?;

    path.push(pi.name.clone());
    for (dep_name, dep_min) in &spec.package_spec.pkg_dependencies {
        let dep = PackageInfo::new(dep_name, "", dep_min);
        walk(&dep, rm, root_repo, archs, done, order, path)?;
    }
    path.pop();

    let info = DepInfo {
        pkg: resolved,
        repo,
    };
    done.insert(pi.name.clone(), info.clone());
    order.push(info);
    Ok(())
}
