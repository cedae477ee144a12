// tests/integration_test.rs

//! End-to-end scenarios: repos served over HTTP, archives downloaded and
//! checksummed, packages installed with real scripts, state persisted in
//! SQLite, removal chains, replacement, and provides-based satisfaction.

#![cfg(unix)]

use googet::archive;
use googet::cancel::CancelToken;
use googet::db::GooDb;
use googet::download::Downloader;
use googet::goospec::{PackageInfo, PackageSpec, PackageState, Repo, RepoMap, RepoSpec};
use googet::install::{InstallOutcome, Installer};
use googet::repos::{self, RepoEntry};
use googet::{remove, resolver, system, Error};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Serve files under `root` over HTTP on an ephemeral localhost port.
/// Returns the base URL. The listener thread lives for the whole test
/// process; each connection is handled once and closed.
fn serve_dir(root: PathBuf) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let root = root.clone();
            std::thread::spawn(move || {
                let mut req = Vec::new();
                let mut buf = [0u8; 1024];
                while !req.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => req.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&req);
                let path = head
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .trim_start_matches('/')
                    .to_string();
                match fs::read(root.join(&path)) {
                    Ok(body) => {
                        let _ = write!(
                            stream,
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let _ = stream.write_all(&body);
                    }
                    Err(_) => {
                        let _ = write!(
                            stream,
                            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        );
                    }
                }
            });
        }
    });
    format!("http://127.0.0.1:{}", addr.port())
}

struct Fixture {
    root: TempDir,
    repo_dir: TempDir,
    payload_dir: TempDir,
    log: PathBuf,
    downloader: Downloader,
    cancel: CancelToken,
    sys: Box<dyn system::System>,
}

impl Fixture {
    fn new() -> Fixture {
        let root = TempDir::new().unwrap();
        let log = root.path().join("install.log");
        Fixture {
            root,
            repo_dir: TempDir::new().unwrap(),
            payload_dir: TempDir::new().unwrap(),
            log,
            downloader: Downloader::new(None, true, Duration::from_secs(10)).unwrap(),
            cancel: CancelToken::new(),
            sys: system::native(),
        }
    }

    fn system(&self) -> &dyn system::System {
        self.sys.as_ref()
    }

    fn db(&self) -> GooDb {
        GooDb::new(
            &self.root.path().join("googet.db"),
            &self.root.path().join("googet.state"),
        )
        .unwrap()
    }

    fn cache_dir(&self) -> PathBuf {
        self.root.path().join("cache")
    }

    fn spec(&self, name: &str, ver: &str) -> PackageSpec {
        PackageSpec {
            name: name.to_string(),
            arch: "noarch".to_string(),
            version: ver.to_string(),
            ..Default::default()
        }
    }

    /// Build a goo in the repo dir whose payload is one file written to the
    /// payload dir, with an install script that appends the package name to
    /// the shared log. Returns its RepoSpec.
    fn gen_goo(&self, mut spec: PackageSpec) -> RepoSpec {
        spec.files.insert(
            spec.name.clone(),
            self.payload_dir
                .path()
                .join(&spec.name)
                .to_string_lossy()
                .to_string(),
        );
        spec.install = googet::goospec::ExecSpec {
            path: "install.sh".to_string(),
            ..Default::default()
        };
        let script = format!("#!/bin/sh\necho {} >> {}\n", spec, self.log.display());
        let payload = spec.to_string();
        let goo = archive::create_package(
            &spec,
            &[
                (spec.name.as_str(), payload.as_bytes()),
                ("install.sh", script.as_bytes()),
            ],
            self.repo_dir.path(),
        )
        .unwrap();
        RepoSpec {
            checksum: archive::checksum_file(&goo).unwrap(),
            source: goo.file_name().unwrap().to_string_lossy().to_string(),
            package_spec: spec,
        }
    }

    fn write_index(&self, specs: &[RepoSpec]) {
        fs::write(
            self.repo_dir.path().join("index"),
            serde_json::to_vec(specs).unwrap(),
        )
        .unwrap();
    }

    fn repo_map(&self, url: &str, specs: Vec<RepoSpec>) -> RepoMap {
        let mut rm = RepoMap::new();
        rm.insert(
            url.to_string(),
            Repo {
                priority: 500,
                packages: specs,
            },
        );
        rm
    }

    fn installed_log(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn installed_names(&self, db: &GooDb) -> Vec<String> {
        db.fetch_pkgs("")
            .unwrap()
            .iter()
            .map(|ps| ps.package_spec.to_string())
            .collect()
    }
}

fn installer<'a>(fx: &'a Fixture, db: &'a mut GooDb) -> Installer<'a> {
    Installer::new(
        db,
        fx.system(),
        &fx.downloader,
        fx.cache_dir(),
        vec!["noarch".to_string(), "x86_64".to_string()],
    )
}

#[test]
fn test_simple_install_via_index_fetch() {
    // S1: repo has A.noarch.1; C.noarch.3 already installed.
    let fx = Fixture::new();
    let rs_a = fx.gen_goo(fx.spec("A", "1"));
    fx.write_index(&[rs_a]);
    let url = serve_dir(fx.repo_dir.path().to_path_buf());

    let mut db = fx.db();
    db.write_state_to_db(&[PackageState {
        package_spec: fx.spec("C", "3"),
        ..Default::default()
    }])
    .unwrap();

    // Full path: .repo entry -> index fetch (gz 404, plain fallback) -> map.
    let entries = vec![RepoEntry {
        name: "test".to_string(),
        url: url.clone(),
        priority: None,
        useoauth: false,
        file_name: String::new(),
    }];
    let rm = repos::available_versions(
        &fx.downloader,
        &fx.cancel,
        &entries,
        &fx.cache_dir(),
        Duration::ZERO,
    );
    assert_eq!(rm[&url].packages.len(), 1);

    let outcome = installer(&fx, &mut db)
        .install(&fx.cancel, "A", &rm, false)
        .unwrap();
    assert_eq!(
        outcome,
        InstallOutcome::Installed(PackageInfo::new("A", "noarch", "1"))
    );

    assert_eq!(fx.installed_names(&db), vec!["A.noarch.1", "C.noarch.3"]);
    // Payload landed in the install dir; archive cached under its pkg name.
    assert_eq!(
        fs::read_to_string(fx.payload_dir.path().join("A")).unwrap(),
        "A.noarch.1"
    );
    assert!(fx.cache_dir().join("A.noarch.1.goo").exists());
    // Index cache was persisted.
    assert!(fs::read_dir(fx.cache_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.path().extension().map(|x| x == "rs").unwrap_or(false)));
}

#[test]
fn test_install_is_idempotent() {
    // S2: installing an already-installed package is a no-op.
    let fx = Fixture::new();
    let rs = fx.gen_goo(fx.spec("A", "1"));
    let url = serve_dir(fx.repo_dir.path().to_path_buf());
    let rm = fx.repo_map(&url, vec![rs]);

    let mut db = fx.db();
    installer(&fx, &mut db)
        .install(&fx.cancel, "A", &rm, false)
        .unwrap();
    let before = db.fetch_pkgs("").unwrap();

    let outcome = installer(&fx, &mut db)
        .install(&fx.cancel, "A", &rm, false)
        .unwrap();
    assert!(matches!(outcome, InstallOutcome::AlreadyInstalled(_)));
    assert_eq!(db.fetch_pkgs("").unwrap(), before);
    // The install script ran exactly once.
    assert_eq!(fx.installed_log(), vec!["A.noarch.1"]);
}

#[test]
fn test_dependency_installed_first() {
    // S3: A depends on B>=2; B installs before A.
    let fx = Fixture::new();
    let mut spec_a = fx.spec("A", "1");
    spec_a
        .pkg_dependencies
        .insert("B".to_string(), "2".to_string());
    let rs_a = fx.gen_goo(spec_a);
    let rs_b = fx.gen_goo(fx.spec("B", "2"));
    let url = serve_dir(fx.repo_dir.path().to_path_buf());
    let rm = fx.repo_map(&url, vec![rs_a, rs_b]);

    let mut db = fx.db();
    installer(&fx, &mut db)
        .install(&fx.cancel, "A", &rm, false)
        .unwrap();

    assert_eq!(fx.installed_names(&db), vec!["A.noarch.1", "B.noarch.2"]);
    assert_eq!(fx.installed_log(), vec!["B.noarch.2", "A.noarch.1"]);
}

#[test]
fn test_replaces_removes_old_package() {
    // S4: B replaces A (matched by name.arch, version ignored).
    let fx = Fixture::new();
    let rs_a = fx.gen_goo(fx.spec("A", "5"));
    let mut spec_b = fx.spec("B", "2");
    spec_b.replaces = vec!["A.noarch.3".to_string()];
    let rs_b = fx.gen_goo(spec_b);
    let url = serve_dir(fx.repo_dir.path().to_path_buf());
    let rm = fx.repo_map(&url, vec![rs_a, rs_b]);

    let mut db = fx.db();
    installer(&fx, &mut db)
        .install(&fx.cancel, "A", &rm, false)
        .unwrap();
    assert!(fx.payload_dir.path().join("A").exists());

    installer(&fx, &mut db)
        .install(&fx.cancel, "B", &rm, false)
        .unwrap();
    assert_eq!(fx.installed_names(&db), vec!["B.noarch.2"]);
    // A's files went with it.
    assert!(!fx.payload_dir.path().join("A").exists());
}

#[test]
fn test_remove_chain_leaves_first() {
    // S5: D -> C -> B -> A; removing A takes the whole chain.
    let fx = Fixture::new();
    let mut db = fx.db();

    let mut states = Vec::new();
    let chain = [("A", "10", None), ("B", "2", Some("A")), ("C", "3", Some("B")), ("D", "4", Some("C"))];
    for (name, ver, dep) in chain {
        let mut spec = fx.spec(name, ver);
        if let Some(d) = dep {
            spec.pkg_dependencies.insert(d.to_string(), "1".to_string());
        }
        let rs = fx.gen_goo(spec.clone());
        // Place the payload file the way an install would have.
        let payload = fx.payload_dir.path().join(name);
        fs::write(&payload, rs.package_spec.to_string()).unwrap();
        states.push(PackageState {
            local_path: fx
                .repo_dir
                .path()
                .join(format!("{}.goo", rs.package_spec))
                .to_string_lossy()
                .to_string(),
            checksum: rs.checksum.clone(),
            package_spec: rs.package_spec,
            installed_files: BTreeMap::from([(
                payload.to_string_lossy().to_string(),
                "digest".to_string(),
            )]),
            ..Default::default()
        });
    }
    db.write_state_to_db(&states).unwrap();

    let target = PackageInfo::new("A", "noarch", "");
    let state = db.fetch_pkgs("").unwrap();
    let order = remove::enumerate_deps(&target, &state);
    let names: Vec<&str> = order.iter().map(|pi| pi.name.as_str()).collect();
    assert_eq!(names, vec!["D", "C", "B", "A"]);

    remove::remove_all(&fx.cancel, &order, false, fx.system(), &mut db).unwrap();
    assert!(fx.installed_names(&db).is_empty());
    for (name, _, _) in chain {
        assert!(!fx.payload_dir.path().join(name).exists());
    }
}

#[test]
fn test_provides_satisfies_dependency() {
    // S6: an installed provider of libfoo=1.5 satisfies libfoo>=1.0, so the
    // resolver never tries to fetch libfoo (which no repo carries).
    let fx = Fixture::new();
    let mut provider = fx.spec("provider", "1");
    provider.provides = vec!["libfoo=1.5".to_string()];
    let mut db = fx.db();
    db.write_state_to_db(&[PackageState {
        package_spec: provider,
        ..Default::default()
    }])
    .unwrap();

    let mut consumer = fx.spec("consumer", "1");
    consumer
        .pkg_dependencies
        .insert("libfoo".to_string(), "1.0".to_string());
    let rs = fx.gen_goo(consumer);
    let url = serve_dir(fx.repo_dir.path().to_path_buf());
    let rm = fx.repo_map(&url, vec![rs]);

    installer(&fx, &mut db)
        .install(&fx.cancel, "consumer", &rm, false)
        .unwrap();
    assert_eq!(
        fx.installed_names(&db),
        vec!["consumer.noarch.1", "provider.noarch.1"]
    );
}

#[test]
fn test_conflict_blocks_install_before_side_effects() {
    let fx = Fixture::new();
    let mut db = fx.db();
    db.write_state_to_db(&[PackageState {
        package_spec: fx.spec("blocker", "1"),
        ..Default::default()
    }])
    .unwrap();

    let mut spec = fx.spec("newpkg", "1");
    spec.conflicts = vec!["blocker".to_string()];
    let rs = fx.gen_goo(spec);
    let url = serve_dir(fx.repo_dir.path().to_path_buf());
    let rm = fx.repo_map(&url, vec![rs]);

    let err = installer(&fx, &mut db)
        .install(&fx.cancel, "newpkg", &rm, false)
        .unwrap_err();
    assert!(matches!(err, Error::ConflictsWithInstalled(_)));
    // Nothing downloaded, nothing installed, no script ran.
    assert_eq!(fx.installed_names(&db), vec!["blocker.noarch.1"]);
    assert!(!fx.cache_dir().join("newpkg.noarch.1.goo").exists());
    assert!(fx.installed_log().is_empty());
}

#[test]
fn test_checksum_mismatch_leaves_state_untouched() {
    let fx = Fixture::new();
    let rs = fx.gen_goo(fx.spec("A", "1"));
    // Corrupt the served archive after the index recorded its checksum.
    let goo = fx.repo_dir.path().join("A.noarch.1.goo");
    let mut bytes = fs::read(&goo).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&goo, bytes).unwrap();

    let url = serve_dir(fx.repo_dir.path().to_path_buf());
    let rm = fx.repo_map(&url, vec![rs]);

    let mut db = fx.db();
    let err = installer(&fx, &mut db)
        .install(&fx.cancel, "A", &rm, false)
        .unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }));
    assert!(fx.installed_names(&db).is_empty());
    assert!(!fx.cache_dir().join("A.noarch.1.goo").exists());
}

#[test]
fn test_corrupt_cached_archive_is_refetched() {
    let fx = Fixture::new();
    let rs = fx.gen_goo(fx.spec("A", "1"));
    let url = serve_dir(fx.repo_dir.path().to_path_buf());
    let rm = fx.repo_map(&url, vec![rs]);

    let mut db = fx.db();
    installer(&fx, &mut db)
        .install(&fx.cancel, "A", &rm, false)
        .unwrap();

    // Flip a byte in the cached copy, then reinstall: the bad cache is
    // ignored and the archive re-fetched.
    let cached = fx.cache_dir().join("A.noarch.1.goo");
    let mut bytes = fs::read(&cached).unwrap();
    bytes[0] ^= 0xff;
    fs::write(&cached, bytes).unwrap();

    installer(&fx, &mut db)
        .install(&fx.cancel, "A", &rm, true)
        .unwrap();
    let expected = db.fetch_pkg("A").unwrap().unwrap().checksum;
    assert_eq!(archive::checksum_file(&cached).unwrap(), expected);
}

#[test]
fn test_upgrade_cleans_stale_files_and_bumps_version() {
    let fx = Fixture::new();
    // v1 installs file "A"; v2 renames its payload, so A's old file goes.
    let rs_v1 = fx.gen_goo(fx.spec("A", "1"));
    let mut spec_v2 = fx.spec("A", "2");
    spec_v2.files.insert(
        "A".to_string(),
        fx.payload_dir
            .path()
            .join("A-renamed")
            .to_string_lossy()
            .to_string(),
    );
    spec_v2.install = googet::goospec::ExecSpec {
        path: "install.sh".to_string(),
        ..Default::default()
    };
    let script = format!("#!/bin/sh\necho A2 >> {}\n", fx.log.display());
    let goo_v2 = archive::create_package(
        &spec_v2,
        &[("A", b"version two"), ("install.sh", script.as_bytes())],
        fx.repo_dir.path(),
    )
    .unwrap();
    let rs_v2 = RepoSpec {
        checksum: archive::checksum_file(&goo_v2).unwrap(),
        source: goo_v2.file_name().unwrap().to_string_lossy().to_string(),
        package_spec: spec_v2,
    };

    let url = serve_dir(fx.repo_dir.path().to_path_buf());
    let rm_v1 = fx.repo_map(&url, vec![rs_v1.clone()]);
    let rm_both = fx.repo_map(&url, vec![rs_v1, rs_v2]);

    let mut db = fx.db();
    installer(&fx, &mut db)
        .install(&fx.cancel, "A", &rm_v1, false)
        .unwrap();
    assert!(fx.payload_dir.path().join("A").exists());

    installer(&fx, &mut db)
        .install(&fx.cancel, "A", &rm_both, false)
        .unwrap();
    assert_eq!(fx.installed_names(&db), vec!["A.noarch.2"]);
    assert!(fx.payload_dir.path().join("A-renamed").exists());
    assert!(!fx.payload_dir.path().join("A").exists());
}

#[test]
fn test_install_from_disk() {
    let fx = Fixture::new();
    fx.gen_goo(fx.spec("local", "1"));
    let goo = fx.repo_dir.path().join("local.noarch.1.goo");

    let mut db = fx.db();
    let outcome = installer(&fx, &mut db)
        .from_disk(&fx.cancel, &goo, false)
        .unwrap();
    assert_eq!(
        outcome,
        InstallOutcome::Installed(PackageInfo::new("local", "noarch", "1"))
    );
    let ps = db.fetch_pkg("local").unwrap().unwrap();
    // No repo involved: no source repo, URL, or checksum recorded.
    assert!(ps.source_repo.is_empty());
    assert!(ps.download_url.is_empty());
    assert!(ps.checksum.is_empty());
    assert!(fx.payload_dir.path().join("local").exists());
}

#[test]
fn test_resolution_makes_no_filesystem_changes() {
    // Dry-run planning goes through the resolver only; prove it is inert.
    let fx = Fixture::new();
    let mut spec_a = fx.spec("A", "1");
    spec_a
        .pkg_dependencies
        .insert("B".to_string(), "1".to_string());
    let rs_a = fx.gen_goo(spec_a);
    let rs_b = fx.gen_goo(fx.spec("B", "1"));
    let rm = fx.repo_map("https://repo.invalid/stable", vec![rs_a, rs_b]);

    let db = fx.db();
    let state = db.fetch_pkgs("").unwrap();
    let pi = PackageInfo::new("A", "noarch", "1");
    let deps =
        resolver::list_deps(&pi, &rm, "https://repo.invalid/stable", &["noarch".to_string()])
            .unwrap();
    assert_eq!(deps.len(), 2);
    for dep in &deps {
        assert!(resolver::needs_installation(&dep.pkg, &state).unwrap());
    }
    assert!(!fx.cache_dir().exists());
    assert!(fx.installed_log().is_empty());
}
