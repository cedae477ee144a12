// src/lock.rs

//! Process-wide mutual exclusion
//!
//! Invocations are short-lived processes serialized by `googet.lock`. The
//! holder takes an exclusive advisory lock, writes its PID, then downgrades
//! to a shared lock so other processes can read the PID. A lock whose
//! holder is gone, or whose file has not been touched within the max age,
//! is stolen by unlinking the file and locking a fresh one.

use crate::error::{Error, Result};
use crate::system::System;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// RAII guard for the GooGet lockfile; dropping it releases the lock and
/// removes the file.
#[derive(Debug)]
pub struct LockFile {
    file: Option<File>,
    path: PathBuf,
}

/// Acquire the lockfile at `path`, stealing stale locks.
pub fn acquire(path: &Path, max_age: Duration, system: &dyn System) -> Result<LockFile> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = open(path)?;
    if file.try_lock_exclusive().is_ok() {
        return hold(file, path);
    }

    let holder = read_pid(&mut file);
    let stale_age = fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .map(|age| age > max_age)
        .unwrap_or(true);
    let holder_dead = holder.map(|pid| !system.is_running(pid)).unwrap_or(true);

    if holder_dead || stale_age {
        warn!(
            "stealing stale lockfile {} (holder {:?})",
            path.display(),
            holder
        );
        // Unlinking detaches any lock still held on the old inode.
        let _ = fs::remove_file(path);
        let file = open(path)?;
        if file.try_lock_exclusive().is_ok() {
            return hold(file, path);
        }
    }

    Err(Error::AlreadyRunning(holder.unwrap_or(0)))
}

fn open(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

fn hold(mut file: File, path: &Path) -> Result<LockFile> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.flush()?;
    // Downgrade so concurrent invocations can read the PID; the PID is on
    // disk before the exclusive lock is given up.
    file.unlock()?;
    file.lock_shared()?;
    info!("acquired lock {}", path.display());
    Ok(LockFile {
        file: Some(file),
        path: path.to_path_buf(),
    })
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut buf = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut buf).ok()?;
    buf.trim().parse().ok()
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
            drop(file);
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goospec::{PackageSpec, PackageState};

    struct FakeSystem {
        running: bool,
    }

    impl System for FakeSystem {
        fn install(&self, _: &Path, _: &PackageSpec) -> Result<i32> {
            Ok(0)
        }
        fn uninstall(&self, _: &Path, _: &PackageState) -> Result<i32> {
            Ok(0)
        }
        fn verify(&self, _: &Path, _: &PackageSpec) -> Result<i32> {
            Ok(0)
        }
        fn app_association(&self, _: &PackageSpec, _: &str) -> (String, String) {
            (String::new(), String::new())
        }
        fn installable_archs(&self) -> Result<Vec<String>> {
            Ok(vec!["noarch".to_string()])
        }
        fn is_admin(&self) -> bool {
            true
        }
        fn is_running(&self, _pid: u32) -> bool {
            self.running
        }
    }

    #[test]
    fn test_acquire_writes_pid_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("googet.lock");
        let system = FakeSystem { running: true };

        let lock = acquire(&path, Duration::from_secs(3600), &system).unwrap();
        let pid: u32 = fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(pid, std::process::id());

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_contended_lock_with_live_holder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("googet.lock");
        let system = FakeSystem { running: true };

        let _held = acquire(&path, Duration::from_secs(3600), &system).unwrap();
        // A second open file description cannot take the lock while the
        // holder reports as running.
        let err = acquire(&path, Duration::from_secs(3600), &system).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(_)));
    }

    #[test]
    fn test_leftover_lockfile_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("googet.lock");
        // A leftover lockfile from a crashed run holds no flock.
        fs::write(&path, "999999").unwrap();

        let system = FakeSystem { running: false };
        let lock = acquire(&path, Duration::from_secs(3600), &system).unwrap();
        let pid: u32 = fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(pid, std::process::id());
        drop(lock);
    }

    #[test]
    fn test_dead_holder_is_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("googet.lock");

        // The first acquisition still holds its shared lock, but the PID it
        // wrote no longer maps to a running instance.
        let _held = acquire(&path, Duration::from_secs(3600), &FakeSystem { running: true }).unwrap();
        let stolen = acquire(&path, Duration::from_secs(3600), &FakeSystem { running: false });
        assert!(stolen.is_ok());
    }
}
