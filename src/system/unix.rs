// src/system/unix.rs

//! Unix implementation of the System adapter
//!
//! Scripts run from the package extraction directory: `.sh` files through
//! `sh`, anything else directly. There is no installed-apps registry on
//! Unix, so app association is empty.

use super::System;
use crate::error::Result;
use crate::goospec::{ExecSpec, PackageSpec, PackageState};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

pub struct UnixSystem;

fn run_script(dir: &Path, exec: &ExecSpec) -> Result<i32> {
    if exec.path.is_empty() {
        return Ok(0);
    }
    let script = dir.join(&exec.path);
    info!("running {} in {}", exec.path, dir.display());

    let mut cmd = if script.extension().map(|e| e == "sh").unwrap_or(false) {
        let mut c = Command::new("sh");
        c.arg(&script);
        c
    } else {
        Command::new(&script)
    };
    let status = cmd.args(&exec.args).current_dir(dir).status()?;
    let code = status.code().unwrap_or(-1);
    debug!("{} exited with code {}", exec.path, code);
    Ok(code)
}

impl System for UnixSystem {
    fn install(&self, dir: &Path, spec: &PackageSpec) -> Result<i32> {
        run_script(dir, &spec.install)
    }

    fn uninstall(&self, dir: &Path, state: &PackageState) -> Result<i32> {
        let spec = &state.package_spec;
        let pre = run_script(dir, &spec.pre_uninstall)?;
        if !spec.pre_uninstall.accepts(pre) {
            return Ok(pre);
        }
        run_script(dir, &spec.uninstall)
    }

    fn verify(&self, dir: &Path, spec: &PackageSpec) -> Result<i32> {
        run_script(dir, &spec.verify)
    }

    fn app_association(&self, _spec: &PackageSpec, _install_source: &str) -> (String, String) {
        (String::new(), String::new())
    }

    fn installable_archs(&self) -> Result<Vec<String>> {
        let mut archs = vec!["noarch".to_string()];
        match std::env::consts::ARCH {
            "x86_64" => archs.push("x86_64".to_string()),
            "aarch64" => archs.push("arm64".to_string()),
            "x86" => archs.push("x86_32".to_string()),
            other => archs.push(other.to_string()),
        }
        Ok(archs)
    }

    fn is_admin(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::fs::MetadataExt;
            // /proc/self is owned by the process's effective uid.
            std::fs::metadata("/proc/self")
                .map(|m| m.uid() == 0)
                .unwrap_or(false)
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }

    fn is_running(&self, pid: u32) -> bool {
        #[cfg(target_os = "linux")]
        {
            Path::new(&format!("/proc/{}", pid)).exists()
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = pid;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_script_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let code = run_script(dir.path(), &ExecSpec::default()).unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn test_script_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fail.sh"), "#!/bin/sh\nexit 7\n").unwrap();
        let exec = ExecSpec {
            path: "fail.sh".to_string(),
            ..Default::default()
        };
        assert_eq!(run_script(dir.path(), &exec).unwrap(), 7);
    }

    #[test]
    fn test_script_args() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("touch.sh"),
            "#!/bin/sh\ntouch \"$1\"\n",
        )
        .unwrap();
        let marker = dir.path().join("ran");
        let exec = ExecSpec {
            path: "touch.sh".to_string(),
            args: vec![marker.to_string_lossy().to_string()],
            ..Default::default()
        };
        assert_eq!(run_script(dir.path(), &exec).unwrap(), 0);
        assert!(marker.exists());
    }

    #[test]
    fn test_uninstall_stops_on_failed_pre_uninstall() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pre.sh"), "#!/bin/sh\nexit 3\n").unwrap();
        let state = PackageState {
            package_spec: PackageSpec {
                pre_uninstall: ExecSpec {
                    path: "pre.sh".to_string(),
                    ..Default::default()
                },
                uninstall: ExecSpec {
                    path: "missing.sh".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        // The failing pre-uninstall code is surfaced; the uninstall script
        // (which would error on a missing file) never runs.
        assert_eq!(UnixSystem.uninstall(dir.path(), &state).unwrap(), 3);
    }

    #[test]
    fn test_installable_archs_include_noarch() {
        let archs = UnixSystem.installable_archs().unwrap();
        assert_eq!(archs[0], "noarch");
        assert_eq!(archs.len(), 2);
    }
}
