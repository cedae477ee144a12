// src/verify.rs

//! On-demand package verification
//!
//! A package's verify command ships inside its archive. Verification pulls
//! the cached archive (re-downloading when it is missing or fails its
//! checksum), extracts just the verify member, and runs it. If that quick
//! path errors, the full archive is re-extracted and the command retried.
//! A failing script is a `false` result, not an error; only the inability
//! to verify at all is.

use crate::archive;
use crate::cancel::CancelToken;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::goospec::PackageState;
use crate::system::System;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Run the verify command of an installed package. Returns whether the
/// package verified; packages without a verify command pass trivially.
pub fn run_verify_command(
    cancel: &CancelToken,
    ps: &PackageState,
    downloader: &Downloader,
    system: &dyn System,
) -> Result<bool> {
    let spec = &ps.package_spec;
    if spec.verify.path.is_empty() {
        return Ok(true);
    }
    cancel.check()?;

    let local = PathBuf::from(&ps.local_path);
    let mut redownload = !local.exists();
    if redownload {
        info!("local archive for {} missing, pulling from repo", spec);
    } else if !ps.checksum.is_empty()
        && !archive::checksum_file(&local)?.eq_ignore_ascii_case(&ps.checksum)
    {
        // An empty checksum means a local install; nothing to compare.
        info!("local archive for {} fails checksum, pulling from repo", spec);
        redownload = true;
    }

    if redownload {
        if ps.download_url.is_empty() {
            return Err(Error::VerifyFailed {
                pkg: spec.info().pkg_name(),
                reason: "archive missing and no download URL saved".to_string(),
            });
        }
        downloader.package(cancel, &ps.download_url, &local, &ps.checksum)?;
    }

    let dir = local.with_extension("");
    archive::extract_member(&local, &spec.verify.path, &dir)?;
    cancel.check()?;

    // Quick path: run only the extracted command, falling back to a full
    // re-extract on any error.
    if run_ok(system, &dir, ps)? {
        return Ok(true);
    }
    let dir = archive::extract_all(&local)?;
    run_ok(system, &dir, ps)
}

fn run_ok(system: &dyn System, dir: &Path, ps: &PackageState) -> Result<bool> {
    let spec = &ps.package_spec;
    match system.verify(dir, spec) {
        Ok(code) if spec.verify.accepts(code) => Ok(true),
        Ok(code) => {
            warn!("verify of {} exited with code {}", spec, code);
            Ok(false)
        }
        Err(e) => {
            warn!("verify of {} did not run: {}", spec, e);
            Ok(false)
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::goospec::{ExecSpec, PackageSpec};
    use crate::system;
    use std::time::Duration;

    fn setup(script: &str) -> (tempfile::TempDir, PackageState) {
        let dir = tempfile::tempdir().unwrap();
        let spec = PackageSpec {
            name: "foo".to_string(),
            arch: "noarch".to_string(),
            version: "1.0.0".to_string(),
            verify: ExecSpec {
                path: "verify.sh".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let goo = archive::create_package(
            &spec,
            &[("verify.sh", script.as_bytes())],
            dir.path(),
        )
        .unwrap();
        let ps = PackageState {
            local_path: goo.to_string_lossy().to_string(),
            package_spec: spec,
            ..Default::default()
        };
        (dir, ps)
    }

    fn downloader() -> Downloader {
        Downloader::new(None, false, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_verify_passes() {
        let (_dir, ps) = setup("#!/bin/sh\nexit 0\n");
        let ok = run_verify_command(
            &CancelToken::new(),
            &ps,
            &downloader(),
            system::native().as_ref(),
        )
        .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_failing_script_is_false_not_error() {
        let (_dir, ps) = setup("#!/bin/sh\nexit 1\n");
        let ok = run_verify_command(
            &CancelToken::new(),
            &ps,
            &downloader(),
            system::native().as_ref(),
        )
        .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_no_verify_command_passes() {
        let ps = PackageState::default();
        let ok = run_verify_command(
            &CancelToken::new(),
            &ps,
            &downloader(),
            system::native().as_ref(),
        )
        .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_missing_archive_without_url_errors() {
        let (_dir, mut ps) = setup("#!/bin/sh\nexit 0\n");
        std::fs::remove_file(&ps.local_path).unwrap();
        ps.download_url = String::new();
        let err = run_verify_command(
            &CancelToken::new(),
            &ps,
            &downloader(),
            system::native().as_ref(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::VerifyFailed { .. }));
    }
}
