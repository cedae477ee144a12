// src/goospec.rs

//! Package identity and specification models
//!
//! These types mirror the JSON wire formats used by goo archives and repo
//! indexes: the `.pkgspec` manifest embedded in every archive, the RepoSpec
//! entries served by repo indexes, and the PackageState records persisted in
//! the installed-package database. Field names on the wire are PascalCase.

use crate::error::{Error, Result};
use crate::version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a package: name, architecture, and version.
///
/// An empty arch or version means "any" for matching purposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub arch: String,
    pub ver: String,
}

impl PackageInfo {
    pub fn new(name: &str, arch: &str, ver: &str) -> Self {
        PackageInfo {
            name: name.to_string(),
            arch: arch.to_string(),
            ver: ver.to_string(),
        }
    }

    /// Split a `name.arch.version` string into its parts. `name.arch` and a
    /// bare `name` are also recognized; the version may itself contain dots.
    pub fn split(pkg: &str) -> Self {
        let mut parts = pkg.splitn(3, '.');
        PackageInfo {
            name: parts.next().unwrap_or("").to_string(),
            arch: parts.next().unwrap_or("").to_string(),
            ver: parts.next().unwrap_or("").to_string(),
        }
    }

    /// The canonical `name.arch.version` form (or `name.arch` without a
    /// version).
    pub fn pkg_name(&self) -> String {
        if self.ver.is_empty() {
            format!("{}.{}", self.name, self.arch)
        } else {
            format!("{}.{}.{}", self.name, self.arch, self.ver)
        }
    }
}

impl fmt::Display for PackageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pkg_name())
    }
}

/// A command carried by a pkgspec: script path, arguments, and the non-zero
/// exit codes accepted in addition to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ExecSpec {
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exit_codes: Vec<i32>,
}

impl ExecSpec {
    /// Whether `code` is an accepted exit status for this command.
    pub fn accepts(&self, code: i32) -> bool {
        code == 0 || self.exit_codes.contains(&code)
    }
}

/// The package manifest embedded in each goo archive as `<name>.pkgspec`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub authors: String,
    pub owners: String,
    pub description: String,
    /// Archive-relative source path -> absolute destination, `<ENV>`
    /// placeholders allowed at the start of the destination.
    pub files: BTreeMap<String, String>,
    pub install: ExecSpec,
    pub uninstall: ExecSpec,
    pub pre_uninstall: ExecSpec,
    pub verify: ExecSpec,
    /// Dependency name -> minimum version.
    pub pkg_dependencies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    /// Virtual names this package satisfies, optionally `name=version`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    /// `name.arch.version` or `name.arch` identities removed after this
    /// package installs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<String>,
}

impl PackageSpec {
    pub fn info(&self) -> PackageInfo {
        PackageInfo::new(&self.name, &self.arch, &self.version)
    }

    /// Basic well-formedness: a spec needs a name, arch, and parseable
    /// version.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidPackageName(self.name.clone()));
        }
        if self.arch.is_empty() {
            return Err(Error::InvalidSpec(format!("package {} has no arch", self.name)));
        }
        version::Version::parse(&self.version)
            .map_err(|_| Error::InvalidVersion(self.version.clone()))?;
        Ok(())
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.name, self.arch, self.version)
    }
}

/// One entry in a repo's index: where the archive lives, its checksum, and
/// the embedded spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RepoSpec {
    pub checksum: String,
    /// Absolute URL or repo-relative path of the archive.
    pub source: String,
    pub package_spec: PackageSpec,
}

/// A repo as seen from the client: its priority and decoded index.
#[derive(Debug, Clone, Default)]
pub struct Repo {
    pub priority: i32,
    pub packages: Vec<RepoSpec>,
}

/// In-memory union of all repos for the current command, keyed by repo URL.
/// A BTreeMap keeps iteration (and therefore URL tie-breaking) deterministic.
pub type RepoMap = BTreeMap<String, Repo>;

/// Name and registry key of the installed-apps entry associated with a
/// package, when the platform tracks one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct InstalledApp {
    pub name: String,
    pub reg: String,
}

/// The stored record for one installed package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct PackageState {
    pub source_repo: String,
    #[serde(rename = "DownloadURL")]
    pub download_url: String,
    pub checksum: String,
    pub local_path: String,
    pub unpack_dir: String,
    pub package_spec: PackageSpec,
    /// Absolute path -> sha256 hex, or "" for directories.
    pub installed_files: BTreeMap<String, String>,
    pub installed_app: InstalledApp,
    /// Unix seconds.
    pub install_date: i64,
}

impl PackageState {
    /// Whether this state matches the package info; empty arch or version in
    /// `pi` matches anything.
    pub fn matches(&self, pi: &PackageInfo) -> bool {
        self.package_spec.name == pi.name
            && (pi.arch.is_empty() || self.package_spec.arch == pi.arch)
            && (pi.ver.is_empty() || self.package_spec.version == pi.ver)
    }
}

/// The overall installed-package state on a client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GooGetState(pub Vec<PackageState>);

impl GooGetState {
    pub fn new() -> Self {
        GooGetState(Vec::new())
    }

    pub fn add(&mut self, ps: PackageState) {
        self.0.push(ps);
    }

    /// Remove the first state matching `pi`; errors when there is no match.
    pub fn remove(&mut self, pi: &PackageInfo) -> Result<()> {
        match self.0.iter().position(|ps| ps.matches(pi)) {
            Some(i) => {
                self.0.swap_remove(i);
                Ok(())
            }
            None => Err(Error::NotFound(format!("package {} in state", pi))),
        }
    }

    pub fn package_state(&self, pi: &PackageInfo) -> Option<&PackageState> {
        self.0.iter().find(|ps| ps.matches(pi))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PackageState> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for GooGetState {
    type Item = PackageState;
    type IntoIter = std::vec::IntoIter<PackageState>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a GooGetState {
    type Item = &'a PackageState;
    type IntoIter = std::slice::Iter<'a, PackageState>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<PackageState> for GooGetState {
    fn from_iter<T: IntoIterator<Item = PackageState>>(iter: T) -> Self {
        GooGetState(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, arch: &str, ver: &str) -> PackageSpec {
        PackageSpec {
            name: name.to_string(),
            arch: arch.to_string(),
            version: ver.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_split() {
        let table = [
            ("foo", ("foo", "", "")),
            ("foo.noarch", ("foo", "noarch", "")),
            ("foo.noarch.1.2.3@4", ("foo", "noarch", "1.2.3@4")),
        ];
        for (input, (name, arch, ver)) in table {
            let pi = PackageInfo::split(input);
            assert_eq!(pi, PackageInfo::new(name, arch, ver), "split({})", input);
        }
    }

    #[test]
    fn test_pkg_name() {
        assert_eq!(PackageInfo::new("a", "noarch", "1").pkg_name(), "a.noarch.1");
        assert_eq!(PackageInfo::new("a", "noarch", "").pkg_name(), "a.noarch");
    }

    #[test]
    fn test_state_match() {
        let ps = PackageState {
            package_spec: spec("foo", "noarch", "1.0.0"),
            ..Default::default()
        };
        assert!(ps.matches(&PackageInfo::new("foo", "noarch", "1.0.0")));
        assert!(ps.matches(&PackageInfo::new("foo", "", "")));
        assert!(ps.matches(&PackageInfo::new("foo", "noarch", "")));
        assert!(!ps.matches(&PackageInfo::new("foo", "x86_64", "")));
        assert!(!ps.matches(&PackageInfo::new("bar", "noarch", "1.0.0")));
    }

    #[test]
    fn test_state_add_remove() {
        let mut state = GooGetState::new();
        state.add(PackageState {
            package_spec: spec("foo", "noarch", "1.0.0"),
            ..Default::default()
        });
        assert_eq!(state.len(), 1);
        assert!(state.remove(&PackageInfo::new("foo", "", "")).is_ok());
        assert!(state.is_empty());
        assert!(state.remove(&PackageInfo::new("foo", "", "")).is_err());
    }

    #[test]
    fn test_wire_field_names() {
        let ps = PackageState {
            source_repo: "https://repo.example.com/stable".to_string(),
            download_url: "https://repo.example.com/stable/pkg.goo".to_string(),
            package_spec: spec("foo", "noarch", "1.0.0"),
            ..Default::default()
        };
        let j = serde_json::to_value(&ps).unwrap();
        assert!(j.get("SourceRepo").is_some());
        assert!(j.get("DownloadURL").is_some());
        assert!(j.get("PackageSpec").is_some());
        assert!(j["PackageSpec"].get("PkgDependencies").is_some());
        assert!(j["PackageSpec"].get("Install").is_some());
    }

    #[test]
    fn test_spec_json_round_trip() {
        let mut s = spec("foo", "noarch", "1.2.3@4");
        s.pkg_dependencies
            .insert("bar".to_string(), "1.0.0".to_string());
        s.files
            .insert("./bin".to_string(), "<ProgramFiles>/foo".to_string());
        s.install = ExecSpec {
            path: "install.ps1".to_string(),
            args: vec!["-quiet".to_string()],
            exit_codes: vec![3010],
        };
        let j = serde_json::to_string(&s).unwrap();
        let back: PackageSpec = serde_json::from_str(&j).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn test_exec_spec_accepts() {
        let e = ExecSpec {
            exit_codes: vec![3010],
            ..Default::default()
        };
        assert!(e.accepts(0));
        assert!(e.accepts(3010));
        assert!(!e.accepts(1));
    }

    #[test]
    fn test_validate() {
        assert!(spec("foo", "noarch", "1.0").validate().is_ok());
        assert!(spec("", "noarch", "1.0").validate().is_err());
        assert!(spec("foo", "", "1.0").validate().is_err());
        assert!(spec("foo", "noarch", "not-a-version").validate().is_err());
    }
}
