// src/db/mod.rs

//! Installed-package state database
//!
//! This module owns the SQLite database recording what is installed on the
//! endpoint. Each row holds one package keyed by `(PkgName, PkgArch)` with
//! the full PackageState as a JSON blob; the unique key replaces on conflict
//! so an upgrade is a plain upsert. All writes happen inside a transaction
//! per public operation; reads need none.

use crate::error::Result;
use crate::goospec::{GooGetState, PackageState};
use crate::version::Version;
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info};

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS InstalledPackages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        PkgName TEXT NOT NULL,
        PkgArch TEXT NOT NULL,
        PkgVer TEXT NOT NULL,
        PkgJson BLOB NOT NULL,
        UNIQUE(PkgName, PkgArch) ON CONFLICT REPLACE
    ) STRICT;
";

const UPSERT: &str = "
    INSERT OR REPLACE INTO InstalledPackages (PkgName, PkgArch, PkgVer, PkgJson)
    VALUES (?1, ?2, ?3, ?4)
";

/// Handle on the GooGet state database.
pub struct GooDb {
    conn: Connection,
}

impl GooDb {
    /// Open or create the database at `db_file`.
    ///
    /// When the database does not exist yet but an older JSON state file
    /// does, its contents are imported once, preserving install dates.
    pub fn new(db_file: &Path, legacy_state_file: &Path) -> Result<GooDb> {
        let existed = db_file.exists();
        if let Some(parent) = db_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_file)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        conn.execute_batch(CREATE_TABLE)?;
        let mut db = GooDb { conn };

        if !existed && legacy_state_file.exists() {
            info!(
                "importing legacy state file {} into {}",
                legacy_state_file.display(),
                db_file.display()
            );
            let text = std::fs::read_to_string(legacy_state_file)?;
            let state: Vec<PackageState> = serde_json::from_str(&text)?;
            db.write_state_to_db(&state)?;
        }
        Ok(db)
    }

    /// Upsert a batch of package states in one transaction; on any failure
    /// the whole batch rolls back.
    pub fn write_state_to_db(&mut self, states: &[PackageState]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for ps in states {
            let spec = &ps.package_spec;
            let json = serde_json::to_vec(ps)?;
            tx.execute(
                UPSERT,
                params![spec.name, spec.arch, spec.version, json],
            )?;
            debug!("wrote state for {}", spec);
        }
        tx.commit()?;
        Ok(())
    }

    /// Fetch at most one installed package by exact name. With several archs
    /// installed the row with the greatest version wins; on a version tie or
    /// unparseable versions the first row by arch ascending does.
    pub fn fetch_pkg(&self, name: &str) -> Result<Option<PackageState>> {
        let mut stmt = self.conn.prepare(
            "SELECT PkgJson FROM InstalledPackages WHERE PkgName = ?1 ORDER BY PkgArch",
        )?;
        let rows = stmt.query_map([name], |row| row.get::<_, Vec<u8>>(0))?;

        let mut best: Option<PackageState> = None;
        for json in rows {
            let ps: PackageState = serde_json::from_slice(&json?)?;
            best = match best {
                None => Some(ps),
                Some(cur) => {
                    let newer = match (
                        Version::parse(&ps.package_spec.version),
                        Version::parse(&cur.package_spec.version),
                    ) {
                        (Ok(a), Ok(b)) => a > b,
                        _ => false,
                    };
                    Some(if newer { ps } else { cur })
                }
            };
        }
        Ok(best)
    }

    /// Fetch all installed packages whose name starts with `name_prefix`
    /// (empty prefix returns everything), ordered by `(name, arch)`.
    ///
    /// The prefix is matched literally in Rust rather than with SQL LIKE, so
    /// `%` and `_` in names or prefixes carry no pattern meaning.
    pub fn fetch_pkgs(&self, name_prefix: &str) -> Result<GooGetState> {
        let mut stmt = self.conn.prepare(
            "SELECT PkgJson FROM InstalledPackages ORDER BY PkgName, PkgArch",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        let mut state = GooGetState::new();
        for json in rows {
            let ps: PackageState = serde_json::from_slice(&json?)?;
            if ps.package_spec.name.starts_with(name_prefix) {
                state.add(ps);
            }
        }
        Ok(state)
    }

    /// Delete the row for `(name, arch)`; an empty arch deletes every row
    /// for the name. Removing an absent package is not an error.
    pub fn remove_pkg(&mut self, name: &str, arch: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        if arch.is_empty() {
            tx.execute("DELETE FROM InstalledPackages WHERE PkgName = ?1", [name])?;
        } else {
            tx.execute(
                "DELETE FROM InstalledPackages WHERE PkgName = ?1 AND PkgArch = ?2",
                params![name, arch],
            )?;
        }
        tx.commit()?;
        debug!("removed state for {}.{}", name, arch);
        Ok(())
    }
}
