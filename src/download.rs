// src/download.rs

//! Archive and index downloading
//!
//! One blocking HTTP client serves every transport need: HTTPS repos, plain
//! HTTP behind the allowunsafeurl gate, and `gs://` object-storage sources
//! rewritten to their public HTTPS endpoint (never proxied). Transient
//! failures retry with exponential backoff; package downloads stream to a
//! temp file, are checksummed, and atomically renamed into place.

use crate::archive;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::oswrap;
use reqwest::blocking::{Client, Response};
use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum attempts for a transient HTTP failure.
const MAX_RETRIES: u32 = 3;

/// Initial retry backoff; doubles per attempt.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// HTTP(S) downloader with proxy and retry support.
pub struct Downloader {
    client: Client,
    /// Object-storage fetches bypass the proxy.
    direct_client: Client,
    allow_unsafe_url: bool,
}

impl Downloader {
    pub fn new(
        proxy_server: Option<&str>,
        allow_unsafe_url: bool,
        timeout: Duration,
    ) -> Result<Self> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(proxy) = proxy_server {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let client = builder.build()?;
        let direct_client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Downloader {
            client,
            direct_client,
            allow_unsafe_url,
        })
    }

    /// Fetch a URL's whole body, retrying transient failures.
    /// Non-success statuses map to `NotFound` so callers can fall back.
    pub fn fetch(&self, cancel: &CancelToken, url: &str) -> Result<Vec<u8>> {
        let (client, url) = self.route(url)?;
        let res = get_with_retry(client, cancel, &url)?;
        if !res.status().is_success() {
            return Err(Error::NotFound(format!("{} ({})", url, res.status())));
        }
        Ok(res.bytes()?.to_vec())
    }

    /// Download a package archive to `dest`, verifying its sha256 against
    /// `expected_checksum`. The body streams to a `.tmp` sibling which is
    /// renamed into place only after the digest matches.
    pub fn package(
        &self,
        cancel: &CancelToken,
        url: &str,
        dest: &Path,
        expected_checksum: &str,
    ) -> Result<()> {
        let (client, url) = self.route(url)?;
        info!("downloading {} to {}", url, dest.display());
        if let Some(parent) = dest.parent() {
            oswrap::mkdir_all(parent)?;
        }

        let mut res = get_with_retry(client, cancel, &url)?;
        if !res.status().is_success() {
            return Err(Error::NotFound(format!("{} ({})", url, res.status())));
        }

        let tmp = dest.with_file_name(format!(
            "{}.tmp",
            dest.file_name().unwrap_or_default().to_string_lossy()
        ));
        let mut f = File::create(oswrap::longpath(&tmp))?;
        res.copy_to(&mut f)?;
        drop(f);
        cancel.check()?;

        let actual = archive::checksum_file(&tmp)?;
        if !expected_checksum.eq_ignore_ascii_case(&actual) {
            let _ = fs::remove_file(oswrap::longpath(&tmp));
            return Err(Error::ChecksumMismatch {
                path: dest.to_path_buf(),
                expected: expected_checksum.to_lowercase(),
                actual,
            });
        }
        fs::rename(oswrap::longpath(&tmp), oswrap::longpath(dest))?;
        debug!("downloaded {}", dest.display());
        Ok(())
    }

    /// Pick the client and concrete URL for a source, enforcing the
    /// plain-http gate.
    fn route(&self, url: &str) -> Result<(&Client, String)> {
        if let Some(rest) = url.strip_prefix("gs://") {
            return Ok((
                &self.direct_client,
                format!("https://storage.googleapis.com/{}", rest),
            ));
        }
        if url.starts_with("http://") && !self.allow_unsafe_url {
            return Err(Error::UnsafeUrl(url.to_string()));
        }
        Ok((&self.client, url.to_string()))
    }
}

fn get_with_retry(client: &Client, cancel: &CancelToken, url: &str) -> Result<Response> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        cancel.check()?;
        match client.get(url).send() {
            Ok(res) if res.status().is_server_error() && attempt < MAX_RETRIES => {
                warn!(
                    "fetch of {} attempt {} returned {}, retrying",
                    url,
                    attempt,
                    res.status()
                );
            }
            Ok(res) => return Ok(res),
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    return Err(e.into());
                }
                warn!("fetch of {} attempt {} failed: {}, retrying", url, attempt, e);
            }
        }
        std::thread::sleep(RETRY_BACKOFF * 2u32.pow(attempt - 1));
    }
}

/// Join a repo-relative source path against its repo URL; absolute sources
/// are used as-is.
pub fn resolve_source(source: &str, repo_url: &str) -> String {
    if source.contains("://") {
        return source.to_string();
    }
    format!(
        "{}/{}",
        repo_url.trim_end_matches('/'),
        source.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader(allow_unsafe: bool) -> Downloader {
        Downloader::new(None, allow_unsafe, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_plain_http_rejected() {
        let dl = downloader(false);
        let err = dl.route("http://repo.example.com/index").unwrap_err();
        assert!(matches!(err, Error::UnsafeUrl(_)));
    }

    #[test]
    fn test_plain_http_allowed_when_configured() {
        let dl = downloader(true);
        assert!(dl.route("http://repo.example.com/index").is_ok());
    }

    #[test]
    fn test_https_always_allowed() {
        let dl = downloader(false);
        assert!(dl.route("https://repo.example.com/index").is_ok());
    }

    #[test]
    fn test_gs_url_rewrite() {
        let dl = downloader(false);
        let (_, url) = dl.route("gs://my-bucket/repo/index.gz").unwrap();
        assert_eq!(url, "https://storage.googleapis.com/my-bucket/repo/index.gz");
    }

    #[test]
    fn test_resolve_source() {
        assert_eq!(
            resolve_source("pkgs/a.goo", "https://repo.example.com/stable"),
            "https://repo.example.com/stable/pkgs/a.goo"
        );
        assert_eq!(
            resolve_source("/pkgs/a.goo", "https://repo.example.com/stable/"),
            "https://repo.example.com/stable/pkgs/a.goo"
        );
        assert_eq!(
            resolve_source("https://cdn.example.com/a.goo", "https://repo.example.com"),
            "https://cdn.example.com/a.goo"
        );
    }

    #[test]
    fn test_cancelled_before_request() {
        let dl = downloader(false);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = dl
            .fetch(&cancel, "https://repo.example.com/index")
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
