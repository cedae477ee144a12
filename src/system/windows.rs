// src/system/windows.rs

//! Windows implementation of the System adapter
//!
//! Scripts dispatch on extension: `.msi` through msiexec, `.msu` through
//! wusa, `.ps1` through powershell, executables directly, and anything else
//! through `cmd /c`. App association walks the registry Uninstall keys so
//! packages can be tied to their Add/Remove Programs entry.

use super::System;
use crate::error::Result;
use crate::goospec::{ExecSpec, PackageSpec, PackageState};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};
use winreg::enums::HKEY_LOCAL_MACHINE;
use winreg::RegKey;

const UNINSTALL_KEYS: &[&str] = &[
    r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall",
    r"SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall",
];

pub struct WindowsSystem;

fn run_script(dir: &Path, exec: &ExecSpec) -> Result<i32> {
    if exec.path.is_empty() {
        return Ok(0);
    }
    let script = dir.join(&exec.path);
    let ext = script
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    info!("running {} in {}", exec.path, dir.display());

    let mut cmd = match ext.as_str() {
        "msi" => {
            let mut c = Command::new("msiexec");
            c.arg("/i").arg(&script).arg("/qn").arg("/norestart");
            c
        }
        "msu" => {
            let mut c = Command::new("wusa");
            c.arg(&script).arg("/quiet").arg("/norestart");
            c
        }
        "ps1" => {
            let mut c = Command::new("powershell");
            c.arg("-NoProfile")
                .arg("-NonInteractive")
                .arg("-ExecutionPolicy")
                .arg("Bypass")
                .arg("-File")
                .arg(&script);
            c
        }
        "exe" => Command::new(&script),
        _ => {
            let mut c = Command::new("cmd");
            c.arg("/c").arg(&script);
            c
        }
    };
    let status = cmd.args(&exec.args).current_dir(dir).status()?;
    let code = status.code().unwrap_or(-1);
    debug!("{} exited with code {}", exec.path, code);
    Ok(code)
}

/// Search the registry Uninstall keys for an entry whose DisplayName
/// mentions the package name or whose Publisher matches the authors.
fn find_app(spec: &PackageSpec) -> (String, String) {
    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    for root in UNINSTALL_KEYS {
        let key = match hklm.open_subkey(root) {
            Ok(k) => k,
            Err(_) => continue,
        };
        for sub_name in key.enum_keys().flatten() {
            let sub = match key.open_subkey(&sub_name) {
                Ok(s) => s,
                Err(_) => continue,
            };
            let display: String = match sub.get_value("DisplayName") {
                Ok(d) => d,
                Err(_) => continue,
            };
            let publisher: String = sub.get_value("Publisher").unwrap_or_default();
            let name_match = display.to_lowercase().contains(&spec.name.to_lowercase());
            let publisher_match =
                !spec.authors.is_empty() && publisher.eq_ignore_ascii_case(&spec.authors);
            if name_match || publisher_match {
                return (display, format!(r"{}\{}", root, sub_name));
            }
        }
    }
    (String::new(), String::new())
}

impl System for WindowsSystem {
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

    fn app_association(&self, spec: &PackageSpec, _install_source: &str) -> (String, String) {
        find_app(spec)
    }

    fn installable_archs(&self) -> Result<Vec<String>> {
        let mut archs = vec!["noarch".to_string()];
        match std::env::var("PROCESSOR_ARCHITECTURE").as_deref() {
            Ok("AMD64") => {
                archs.push("x86_32".to_string());
                archs.push("x86_64".to_string());
            }
            Ok("ARM64") => archs.push("arm64".to_string()),
            _ => archs.push("x86_32".to_string()),
        }
        Ok(archs)
    }

    fn is_admin(&self) -> bool {
        // `net session` only succeeds from an elevated shell.
        Command::new("net")
            .arg("session")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn is_running(&self, pid: u32) -> bool {
        let out = match Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/FO", "CSV", "/NH"])
            .output()
        {
            Ok(o) => o,
            Err(_) => return false,
        };
        String::from_utf8_lossy(&out.stdout)
            .to_lowercase()
            .contains("googet")
    }
}
