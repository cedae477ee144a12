// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for GooGet
#[derive(Error, Debug)]
pub enum Error {
    /// Version string does not match `N(.N)*(-tag)?(@R)?`
    #[error("invalid version {0:?}")]
    InvalidVersion(String),

    /// Package name is empty or malformed
    #[error("invalid package name {0:?}")]
    InvalidPackageName(String),

    /// Embedded pkgspec is malformed or inconsistent
    #[error("invalid package spec: {0}")]
    InvalidSpec(String),

    /// Package, repo, or archive member missing
    #[error("{0} not found")]
    NotFound(String),

    /// A dependency could not be located in any repo
    #[error("cannot resolve dependency, {0}")]
    DependencyUnresolved(String),

    /// The dependency graph contains a cycle
    #[error("dependency cycle involving {0}")]
    DependencyCycle(String),

    /// Candidate conflicts with an installed or provided package
    #[error("cannot install, conflict with installed package or provider: {0}")]
    ConflictsWithInstalled(String),

    /// Downloaded or cached archive does not match the expected digest
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Plain-http source rejected because allowunsafeurl is false
    #[error("unsafe URL {0:?}: plain http sources require allowunsafeurl")]
    UnsafeUrl(String),

    /// HTTP transport failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("install script for {pkg} exited with code {code}")]
    InstallScriptFailed { pkg: String, code: i32 },

    #[error("uninstall script for {pkg} exited with code {code}")]
    UninstallScriptFailed { pkg: String, code: i32 },

    /// Verification could not run at all (distinct from a failing verify
    /// script, which is surfaced as a non-fatal `false` result)
    #[error("verify of {pkg} failed: {reason}")]
    VerifyFailed { pkg: String, reason: String },

    /// Database-related errors
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Another process holds the lockfile
    #[error("another GooGet instance is already running (pid {0})")]
    AlreadyRunning(u32),

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias using GooGet's Error type
pub type Result<T> = std::result::Result<T, Error>;
