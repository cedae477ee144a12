// src/repos.rs

//! Repo files and index fetching
//!
//! Endpoints name their package sources in `repos/*.repo` YAML files. Each
//! repo serves a JSON index (optionally gzipped) at `<url>/index.gz` with a
//! plain `<url>/index` fallback. Decoded indexes are cached on disk as
//! pretty JSON next to the archives and reused while younger than the
//! configured cache life.

use crate::cancel::CancelToken;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::goospec::{Repo, RepoMap, RepoSpec};
use crate::oswrap;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};

/// Default repo priority; higher is preferred.
pub const DEFAULT_PRIORITY: i32 = 500;

/// Bounded fan-out for parallel index fetches.
const MAX_CONCURRENT_FETCHES: usize = 8;

/// One entry of a `.repo` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoEntry {
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub useoauth: bool,
    /// The `.repo` file this entry came from; not persisted.
    #[serde(skip)]
    pub file_name: String,
}

impl RepoEntry {
    pub fn priority(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }
}

/// Possible shapes of a `.repo` file: a YAML list of entries or one bare
/// entry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RepoFile {
    List(Vec<RepoEntry>),
    Single(RepoEntry),
}

/// Read every `*.repo` file under `repo_dir`. Entries without a name take
/// the file's basename; entries without a URL are skipped.
pub fn repos(repo_dir: &Path) -> Result<Vec<RepoEntry>> {
    let mut entries = Vec::new();
    let dir = match fs::read_dir(repo_dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e.into()),
    };
    let mut files: Vec<PathBuf> = dir
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|x| x == "repo").unwrap_or(false))
        .collect();
    files.sort();

    for file in files {
        let text = fs::read_to_string(&file)?;
        let parsed: RepoFile = serde_yaml::from_str(&text)?;
        let mut file_entries = match parsed {
            RepoFile::List(l) => l,
            RepoFile::Single(e) => vec![e],
        };
        let base = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        for mut e in file_entries.drain(..) {
            if e.url.is_empty() {
                continue;
            }
            if e.name.is_empty() {
                e.name = base.clone();
            }
            e.file_name = file.to_string_lossy().to_string();
            entries.push(e);
        }
    }
    Ok(entries)
}

/// Write `<name>.repo` containing a single entry. An existing file with the
/// same name is overwritten.
pub fn add_repo(repo_dir: &Path, name: &str, url: &str) -> Result<PathBuf> {
    oswrap::mkdir_all(repo_dir)?;
    let entry = RepoEntry {
        name: name.to_string(),
        url: url.to_string(),
        priority: None,
        useoauth: false,
        file_name: String::new(),
    };
    let path = repo_dir.join(format!("{}.repo", name));
    let yaml = serde_yaml::to_string(&vec![entry])?;
    fs::write(&path, yaml)?;
    info!("added repo {} ({})", name, url);
    Ok(path)
}

/// Remove every entry named `name` from the `.repo` files, deleting files
/// left empty. Matching is case-insensitive (repo names are the one place
/// GooGet folds case). Returns whether anything was removed.
pub fn remove_repo(repo_dir: &Path, name: &str) -> Result<bool> {
    let want = name.to_lowercase();
    let mut by_file: std::collections::BTreeMap<String, Vec<RepoEntry>> =
        std::collections::BTreeMap::new();
    for entry in repos(repo_dir)? {
        by_file.entry(entry.file_name.clone()).or_default().push(entry);
    }

    let mut removed = false;
    for (file, entries) in by_file {
        if !entries.iter().any(|e| e.name.to_lowercase() == want) {
            continue;
        }
        removed = true;
        let keep: Vec<RepoEntry> = entries
            .into_iter()
            .filter(|e| e.name.to_lowercase() != want)
            .collect();
        if keep.is_empty() {
            fs::remove_file(&file)?;
        } else {
            fs::write(&file, serde_yaml::to_string(&keep)?)?;
        }
    }
    Ok(removed)
}

/// Where the decoded index for `url` is cached: `cache_dir/<basename>.rs`.
fn cache_path(cache_dir: &Path, url: &str) -> PathBuf {
    let base = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url);
    cache_dir.join(format!("{}.rs", base))
}

/// Decode an index payload: gzip-sniffed, then one or more concatenated
/// top-level JSON arrays of RepoSpec.
fn decode_specs(data: &[u8]) -> Result<Vec<RepoSpec>> {
    let plain;
    let data = if data.starts_with(&[0x1f, 0x8b]) {
        let mut buf = Vec::new();
        GzDecoder::new(data).read_to_end(&mut buf)?;
        plain = buf;
        &plain[..]
    } else {
        data
    };

    let mut specs = Vec::new();
    for chunk in serde_json::Deserializer::from_slice(data).into_iter::<Vec<RepoSpec>>() {
        specs.extend(chunk?);
    }
    Ok(specs)
}

/// Persist a decoded index atomically as pretty JSON.
fn write_cache(cf: &Path, specs: &[RepoSpec]) -> Result<()> {
    if let Some(parent) = cf.parent() {
        oswrap::mkdir_all(parent)?;
    }
    let tmp = cf.with_extension("rs.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(specs)?)?;
    fs::rename(&tmp, cf)?;
    Ok(())
}

fn read_cache(cf: &Path) -> Result<Vec<RepoSpec>> {
    decode_specs(&fs::read(cf)?)
}

/// Fetch and decode one repo's index, or reuse the cached copy while its
/// mtime is younger than `cache_life`.
fn unmarshal_repo_packages(
    dl: &Downloader,
    cancel: &CancelToken,
    url: &str,
    cache_dir: &Path,
    cache_life: Duration,
) -> Result<Vec<RepoSpec>> {
    let cf = cache_path(cache_dir, url);
    if let Ok(meta) = fs::metadata(&cf) {
        let fresh = meta
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .map(|age| age < cache_life)
            .unwrap_or(false);
        if fresh {
            info!("using cached repo content for {}", url);
            return read_cache(&cf);
        }
    }
    info!("fetching repo content for {}", url);

    let base = url.trim_end_matches('/');
    let data = match dl.fetch(cancel, &format!("{}/index.gz", base)) {
        Ok(data) => data,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => {
            debug!("gzipped index for {} unavailable ({}), trying plain", url, e);
            dl.fetch(cancel, &format!("{}/index", base))?
        }
    };
    let specs = decode_specs(&data)?;
    write_cache(&cf, &specs)?;
    Ok(specs)
}

/// Build the RepoMap for a set of repo entries, fetching indexes with
/// bounded parallelism. Unreachable repos are logged and skipped; duplicate
/// URLs merge, keeping the highest priority.
pub fn available_versions(
    dl: &Downloader,
    cancel: &CancelToken,
    entries: &[RepoEntry],
    cache_dir: &Path,
    cache_life: Duration,
) -> RepoMap {
    let mut rm = RepoMap::new();
    for chunk in entries.chunks(MAX_CONCURRENT_FETCHES) {
        let results: Vec<(&RepoEntry, Result<Vec<RepoSpec>>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|e| {
                    scope.spawn(move || {
                        (
                            e,
                            unmarshal_repo_packages(dl, cancel, &e.url, cache_dir, cache_life),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (entry, res) in results {
            match res {
                Ok(specs) => {
                    let repo = rm.entry(entry.url.clone()).or_insert_with(|| Repo {
                        priority: entry.priority(),
                        packages: Vec::new(),
                    });
                    repo.priority = repo.priority.max(entry.priority());
                    repo.packages.extend(specs);
                }
                Err(e) => error!("error reading repo {:?}: {}", entry.url, e),
            }
        }
    }
    rm
}
