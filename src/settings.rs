// src/settings.rs

//! Endpoint configuration
//!
//! Everything under `<rootDir>` belongs to GooGet: `googet.conf`,
//! `googet.db`, `googet.lock`, `repos/*.repo`, and the download cache.
//! `Settings` is built once per invocation from the conf file and passed by
//! value into each component; there is no global mutable state.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default repo index cache TTL.
pub const DEFAULT_CACHE_LIFE: Duration = Duration::from_secs(3 * 60);
/// Default threshold after which a held lockfile is considered stale.
pub const DEFAULT_LOCK_FILE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
/// Default per-fetch timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root_dir: PathBuf,
    pub confirm: bool,
    /// Acceptable architectures in preference order.
    pub archs: Vec<String>,
    pub cache_life: Duration,
    pub lock_file_max_age: Duration,
    pub allow_unsafe_url: bool,
    pub proxy_server: Option<String>,
    pub timeout: Duration,
}

/// On-disk `googet.conf` shape. All keys are optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfFile {
    archs: Option<Vec<String>>,
    cachelife: Option<String>,
    lockfilemaxage: Option<String>,
    allowunsafeurl: Option<bool>,
    proxyserver: Option<String>,
}

impl Settings {
    /// Build settings from `<root_dir>/googet.conf`, falling back to
    /// `default_archs` when the conf names none. Unparseable durations keep
    /// their defaults with a warning, matching the conf file's advisory
    /// nature.
    pub fn initialize(root_dir: &Path, confirm: bool, default_archs: Vec<String>) -> Settings {
        let mut s = Settings {
            root_dir: root_dir.to_path_buf(),
            confirm,
            archs: default_archs,
            cache_life: DEFAULT_CACHE_LIFE,
            lock_file_max_age: DEFAULT_LOCK_FILE_MAX_AGE,
            allow_unsafe_url: false,
            proxy_server: None,
            timeout: DEFAULT_TIMEOUT,
        };

        let conf_path = s.conf_file();
        let conf: ConfFile = match std::fs::read_to_string(&conf_path) {
            Ok(text) => match serde_yaml::from_str(&text) {
                Ok(c) => c,
                Err(e) => {
                    warn!("ignoring malformed {}: {}", conf_path.display(), e);
                    ConfFile::default()
                }
            },
            Err(_) => ConfFile::default(),
        };

        if let Some(archs) = conf.archs {
            if !archs.is_empty() {
                s.archs = archs;
            }
        }
        if let Some(v) = conf.cachelife {
            match parse_duration(&v) {
                Ok(d) => s.cache_life = d,
                Err(e) => warn!("ignoring cachelife: {}", e),
            }
        }
        if let Some(v) = conf.lockfilemaxage {
            match parse_duration(&v) {
                Ok(d) => s.lock_file_max_age = d,
                Err(e) => warn!("ignoring lockfilemaxage: {}", e),
            }
        }
        if let Some(v) = conf.allowunsafeurl {
            s.allow_unsafe_url = v;
        }
        s.proxy_server = conf.proxyserver.filter(|p| !p.is_empty());
        s
    }

    pub fn conf_file(&self) -> PathBuf {
        self.root_dir.join("googet.conf")
    }

    pub fn db_file(&self) -> PathBuf {
        self.root_dir.join("googet.db")
    }

    /// The legacy JSON state file imported into the database once.
    pub fn state_file(&self) -> PathBuf {
        self.root_dir.join("googet.state")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root_dir.join("googet.lock")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root_dir.join("cache")
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.root_dir.join("repos")
    }
}

/// Parse durations of the form `90s`, `10m`, `24h`, `7d`, or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let n: u64 = num
        .parse()
        .map_err(|_| Error::InvalidSpec(format!("bad duration {:?}", s)))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 60 * 60,
        "d" => n * 24 * 60 * 60,
        _ => return Err(Error::InvalidSpec(format!("bad duration {:?}", s))),
    };
    Ok(Duration::from_secs(secs))
}
