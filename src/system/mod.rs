// src/system/mod.rs

//! OS-specific package actions
//!
//! The lifecycle engine talks to the operating system through the narrow
//! `System` capability set: script invocation for install/uninstall/verify,
//! installed-app association lookup, supported architectures, and process
//! inspection for the lockfile. One implementation exists per OS, selected
//! at build time.
//!
//! `uninstall` runs the package's pre-uninstall command (when present)
//! before its uninstall command, so callers see one operation.

use crate::error::Result;
use crate::goospec::{PackageSpec, PackageState};
use std::path::Path;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

/// Narrow OS capability set used by the lifecycle engine.
pub trait System {
    /// Run the package's install command from its extraction directory,
    /// returning the script's exit code. A spec without an install command
    /// succeeds with code 0.
    fn install(&self, dir: &Path, spec: &PackageSpec) -> Result<i32>;

    /// Run the pre-uninstall (if any) and uninstall commands. Returns the
    /// first non-accepted exit code encountered, or the uninstall command's
    /// code.
    fn uninstall(&self, dir: &Path, state: &PackageState) -> Result<i32>;

    /// Run the package's verify command.
    fn verify(&self, dir: &Path, spec: &PackageSpec) -> Result<i32>;

    /// Name and registry key of the installed-apps entry matching this
    /// package, or empty strings where the platform has no such registry.
    fn app_association(&self, spec: &PackageSpec, install_source: &str) -> (String, String);

    /// Architectures installable on this machine, most specific last.
    fn installable_archs(&self) -> Result<Vec<String>>;

    /// Whether the current process has administrative rights.
    fn is_admin(&self) -> bool;

    /// Whether `pid` is a live GooGet process (used for stale-lock
    /// takeover).
    fn is_running(&self, pid: u32) -> bool;
}

/// The System implementation for the build target.
pub fn native() -> Box<dyn System> {
    #[cfg(unix)]
    {
        Box::new(unix::UnixSystem)
    }
    #[cfg(windows)]
    {
        Box::new(windows::WindowsSystem)
    }
}
