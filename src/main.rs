// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use googet::cancel::CancelToken;
use googet::db::GooDb;
use googet::download::{self, Downloader};
use googet::goospec::{InstalledApp, PackageInfo, PackageState, RepoMap};
use googet::install::{InstallOutcome, Installer};
use googet::repos::RepoEntry;
use googet::settings::Settings;
use googet::{lock, remove, repos, resolver, system, verify};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "googet")]
#[command(version, about = "GooGet package manager", long_about = None)]
struct Cli {
    /// GooGet root directory
    #[arg(long, global = true, env = "GOOGET_ROOT")]
    root: Option<PathBuf>,

    /// Never prompt for confirmation
    #[arg(long, global = true)]
    noconfirm: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and install packages and their dependencies
    Install {
        /// Install even if already installed
        #[arg(long)]
        reinstall: bool,
        /// Redownload package files (requires --reinstall)
        #[arg(long)]
        redownload: bool,
        /// Only make changes to the database, skip system actions
        #[arg(long)]
        db_only: bool,
        /// Show what would be installed without installing
        #[arg(long)]
        dry_run: bool,
        /// Comma-separated repo URLs, overriding local .repo files
        #[arg(long)]
        sources: Option<String>,
        /// Packages (name, name.arch, name.arch.version) or .goo files
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Uninstall packages and their dependents
    Remove {
        /// Only make changes to the database, skip system actions
        #[arg(long)]
        db_only: bool,
        /// Show what would be removed but do not remove
        #[arg(long)]
        dry_run: bool,
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Update installed packages to the latest available versions
    Update {
        /// Show what would be updated without updating
        #[arg(long)]
        dry_run: bool,
        /// Comma-separated repo URLs, overriding local .repo files
        #[arg(long)]
        sources: Option<String>,
    },
    /// Find unmanaged software known to the repos and adopt it
    Check {
        /// Don't make any changes to the database
        #[arg(long)]
        dry_run: bool,
        /// Comma-separated repo URLs, overriding local .repo files
        #[arg(long)]
        sources: Option<String>,
    },
    /// List installed packages
    Installed {
        /// Show package descriptions and install dates
        #[arg(long)]
        info: bool,
        /// Show the files a package installed
        #[arg(long)]
        files: bool,
        /// Package name prefix
        pattern: Option<String>,
    },
    /// List packages available in the repos
    Available {
        /// Comma-separated repo URLs, overriding local .repo files
        #[arg(long)]
        sources: Option<String>,
        /// Show package descriptions
        #[arg(long)]
        info: bool,
        /// Package name prefix
        pattern: Option<String>,
    },
    /// Add a repository
    Addrepo { name: String, url: String },
    /// Remove a repository
    Rmrepo { name: String },
    /// List configured repositories
    Listrepos,
    /// Run the verify command of installed packages
    Verify {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Empty the download cache
    Clean,
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn default_root() -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(r"C:\ProgramData\GooGet")
    }
    #[cfg(not(windows))]
    {
        PathBuf::from("/var/lib/googet")
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "googet=debug" } else { "googet=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let sys = system::native();
    let default_archs = sys
        .installable_archs()
        .unwrap_or_else(|_| vec!["noarch".to_string()]);
    let root = cli.root.clone().unwrap_or_else(default_root);
    let confirm = !cli.noconfirm && std::io::stdin().is_terminal();
    let settings = Settings::initialize(&root, confirm, default_archs);

    let code = match run(&cli.command, &settings, sys.as_ref()) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("googet: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run(cmd: &Commands, settings: &Settings, sys: &dyn system::System) -> Result<i32> {
    let cancel = CancelToken::new();
    match cmd {
        Commands::Install {
            reinstall,
            redownload,
            db_only,
            dry_run,
            sources,
            packages,
        } => {
            if *redownload && !*reinstall {
                eprintln!("the --redownload flag requires the --reinstall flag");
                return Ok(2);
            }
            cmd_install(
                settings, sys, &cancel, packages, sources, *reinstall, *redownload, *db_only,
                *dry_run,
            )
        }
        Commands::Remove {
            db_only,
            dry_run,
            packages,
        } => cmd_remove(settings, sys, &cancel, packages, *db_only, *dry_run),
        Commands::Update { dry_run, sources } => {
            cmd_update(settings, sys, &cancel, sources, *dry_run)
        }
        Commands::Check { dry_run, sources } => {
            cmd_check(settings, sys, &cancel, sources, *dry_run)
        }
        Commands::Installed {
            info,
            files,
            pattern,
        } => cmd_installed(settings, pattern.as_deref().unwrap_or(""), *info, *files),
        Commands::Available {
            sources,
            info,
            pattern,
        } => cmd_available(settings, &cancel, sources, pattern.as_deref().unwrap_or(""), *info),
        Commands::Addrepo { name, url } => {
            let path = repos::add_repo(&settings.repo_dir(), name, url)?;
            println!("Added repo {} ({}) at {}", name, url, path.display());
            Ok(0)
        }
        Commands::Rmrepo { name } => {
            if repos::remove_repo(&settings.repo_dir(), name)? {
                println!("Removed repo {}", name);
                Ok(0)
            } else {
                eprintln!("Repo {} not found", name);
                Ok(1)
            }
        }
        Commands::Listrepos => cmd_listrepos(settings),
        Commands::Verify { packages } => cmd_verify(settings, sys, &cancel, packages),
        Commands::Clean => cmd_clean(settings),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "googet", &mut std::io::stdout());
            Ok(0)
        }
    }
}

fn downloader(settings: &Settings) -> Result<Downloader> {
    Ok(Downloader::new(
        settings.proxy_server.as_deref(),
        settings.allow_unsafe_url,
        settings.timeout,
    )?)
}

/// Repo entries for the command: the --sources override or the `.repo`
/// files under the root.
fn build_sources(settings: &Settings, sources: &Option<String>) -> Result<Vec<RepoEntry>> {
    match sources {
        Some(list) => Ok(list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|url| RepoEntry {
                name: url.to_string(),
                url: url.to_string(),
                priority: None,
                useoauth: false,
                file_name: String::new(),
            })
            .collect()),
        None => Ok(repos::repos(&settings.repo_dir())?),
    }
}

fn repo_map(
    settings: &Settings,
    cancel: &CancelToken,
    dl: &Downloader,
    sources: &Option<String>,
) -> Result<RepoMap> {
    let entries = build_sources(settings, sources)?;
    if entries.is_empty() {
        anyhow::bail!("no repos defined: create a .repo file or pass --sources");
    }
    Ok(repos::available_versions(
        dl,
        cancel,
        &entries,
        &settings.cache_dir(),
        settings.cache_life,
    ))
}

#[allow(clippy::too_many_arguments)]
fn cmd_install(
    settings: &Settings,
    sys: &dyn system::System,
    cancel: &CancelToken,
    packages: &[String],
    sources: &Option<String>,
    reinstall: bool,
    redownload: bool,
    db_only: bool,
    dry_run: bool,
) -> Result<i32> {
    let dl = downloader(settings)?;
    let all_files = packages.iter().all(|p| p.ends_with(".goo"));
    let rm = if all_files {
        RepoMap::new()
    } else {
        repo_map(settings, cancel, &dl, sources)?
    };

    if dry_run {
        let mut db = GooDb::new(&settings.db_file(), &settings.state_file())?;
        return dry_run_install(&mut db, &rm, settings, packages);
    }

    let _lock = lock::acquire(&settings.lock_file(), settings.lock_file_max_age, sys)?;
    let mut db = GooDb::new(&settings.db_file(), &settings.state_file())?;
    let mut installer = Installer::new(
        &mut db,
        sys,
        &dl,
        settings.cache_dir(),
        settings.archs.clone(),
    );
    installer.db_only = db_only;
    installer.redownload = redownload;

    let mut failures = 0;
    for pkg in packages {
        if !confirmation(settings, &format!("Install {} and all dependencies?", pkg)) {
            println!("Not installing {}...", pkg);
            continue;
        }
        let outcome = if pkg.ends_with(".goo") {
            installer.from_disk(cancel, Path::new(pkg), reinstall)
        } else {
            installer.install(cancel, pkg, &rm, reinstall)
        };
        match outcome {
            Ok(InstallOutcome::Installed(pi)) => println!("Installation of {} completed", pi),
            Ok(InstallOutcome::AlreadyInstalled(pi)) => {
                println!("{} or a newer version is already installed on the system", pi)
            }
            Err(e) => {
                error!("error installing {:?}: {}", pkg, e);
                eprintln!("error installing {}: {}", pkg, e);
                failures += 1;
            }
        }
    }
    Ok(if failures > 0 { 1 } else { 0 })
}

fn dry_run_install(
    db: &mut GooDb,
    rm: &RepoMap,
    settings: &Settings,
    packages: &[String],
) -> Result<i32> {
    let state = db.fetch_pkgs("")?;
    for pkg in packages {
        if pkg.ends_with(".goo") {
            println!("Would install {} from file", pkg);
            continue;
        }
        let mut pi = PackageInfo::split(pkg);
        let (ver, repo, arch) = resolver::find_repo_latest(&pi, rm, &settings.archs)?;
        if pi.ver.is_empty() {
            pi.ver = ver;
        }
        if pi.arch.is_empty() {
            pi.arch = arch;
        }
        if !resolver::needs_installation(&pi, &state)? {
            println!("{} or a newer version is already installed on the system", pi);
            continue;
        }
        println!("The following packages would be installed:");
        for dep in resolver::list_deps(&pi, rm, &repo, &settings.archs)? {
            if resolver::needs_installation(&dep.pkg, &state)? {
                println!("  {} (from {})", dep.pkg, dep.repo);
            }
        }
    }
    Ok(0)
}

fn cmd_remove(
    settings: &Settings,
    sys: &dyn system::System,
    cancel: &CancelToken,
    packages: &[String],
    db_only: bool,
    dry_run: bool,
) -> Result<i32> {
    let lock_guard = if dry_run {
        None
    } else {
        Some(lock::acquire(&settings.lock_file(), settings.lock_file_max_age, sys)?)
    };
    let mut db = GooDb::new(&settings.db_file(), &settings.state_file())?;

    let mut failures = 0;
    for pkg in packages {
        let pi = PackageInfo::split(pkg);
        let state = db.fetch_pkgs("")?;
        let installed = state.iter().any(|ps| ps.package_spec.name == pi.name);
        if !installed {
            eprintln!("Package {} not installed, cannot remove.", pkg);
            continue;
        }
        let order = remove::enumerate_deps(&pi, &state);
        if dry_run {
            println!("Dry run: the following packages would be removed:");
            for d in &order {
                println!("  {}", d);
            }
            continue;
        }
        if !confirmation(
            settings,
            &format!("Remove {} and all dependent packages?", pi.name),
        ) {
            println!("canceling removal...");
            continue;
        }
        println!("Removing {} and all dependent packages...", pi.name);
        match remove::remove_all(cancel, &order, db_only, sys, &mut db) {
            Ok(()) => println!("Removal of {} completed", pi.name),
            Err(e) => {
                error!("error removing {:?}: {}", pkg, e);
                eprintln!("error removing {}: {}", pkg, e);
                failures += 1;
            }
        }
    }
    drop(lock_guard);
    Ok(if failures > 0 { 1 } else { 0 })
}

fn cmd_update(
    settings: &Settings,
    sys: &dyn system::System,
    cancel: &CancelToken,
    sources: &Option<String>,
    dry_run: bool,
) -> Result<i32> {
    let dl = downloader(settings)?;
    let rm = repo_map(settings, cancel, &dl, sources)?;
    let mut db = GooDb::new(&settings.db_file(), &settings.state_file())?;
    let state = db.fetch_pkgs("")?;

    // Decide the whole update set before mutating anything.
    let mut updates = Vec::new();
    for ps in &state {
        let spec = &ps.package_spec;
        let pi = PackageInfo::new(&spec.name, &spec.arch, "");
        let (ver, _, _) = match resolver::find_repo_latest(&pi, &rm, &settings.archs) {
            Ok(found) => found,
            Err(_) => continue,
        };
        match googet::version::compare(&ver, &spec.version) {
            Ok(1) => updates.push(PackageInfo::new(&spec.name, &spec.arch, &ver)),
            Ok(_) => {}
            Err(e) => error!("cannot compare versions for {}: {}", spec.name, e),
        }
    }

    if updates.is_empty() {
        println!("No updates available.");
        return Ok(0);
    }
    if dry_run {
        println!("The following packages would be updated:");
        for pi in &updates {
            println!("  {}", pi);
        }
        return Ok(0);
    }

    let _lock = lock::acquire(&settings.lock_file(), settings.lock_file_max_age, sys)?;
    let mut installer = Installer::new(
        &mut db,
        sys,
        &dl,
        settings.cache_dir(),
        settings.archs.clone(),
    );
    let mut failures = 0;
    for pi in &updates {
        match installer.install(cancel, &pi.pkg_name(), &rm, false) {
            Ok(_) => println!("Updated {}", pi),
            Err(e) => {
                error!("error updating {}: {}", pi, e);
                eprintln!("error updating {}: {}", pi, e);
                failures += 1;
            }
        }
    }
    Ok(if failures > 0 { 1 } else { 0 })
}

fn cmd_check(
    settings: &Settings,
    sys: &dyn system::System,
    cancel: &CancelToken,
    sources: &Option<String>,
    dry_run: bool,
) -> Result<i32> {
    let dl = downloader(settings)?;
    let rm = repo_map(settings, cancel, &dl, sources)?;
    let mut db = GooDb::new(&settings.db_file(), &settings.state_file())?;
    let state = db.fetch_pkgs("")?;
    let installed: std::collections::BTreeSet<&str> = state
        .iter()
        .map(|ps| ps.package_spec.name.as_str())
        .collect();

    println!("Searching for unmanaged software...");
    let mut unmanaged = std::collections::BTreeMap::new();
    let mut adopt: Vec<(String, googet::goospec::RepoSpec)> = Vec::new();
    for (url, repo) in &rm {
        for rs in &repo.packages {
            let spec = &rs.package_spec;
            if installed.contains(spec.name.as_str()) || unmanaged.contains_key(&spec.name) {
                continue;
            }
            let (app, _) = sys.app_association(spec, "");
            if app.is_empty() {
                continue;
            }
            unmanaged.insert(spec.name.clone(), app);
            adopt.push((url.clone(), rs.clone()));
        }
    }

    if unmanaged.is_empty() {
        println!("No unmanaged software found.");
        return Ok(0);
    }

    let mut failures = 0;
    if !dry_run {
        let _lock = lock::acquire(&settings.lock_file(), settings.lock_file_max_age, sys)?;
        // Adoption only records what is already on the endpoint: a db-only
        // state row for the matched package, plus re-affirmed rows for any
        // of its dependencies that the database already shows installed.
        // Nothing is downloaded and missing dependencies are never
        // installed from here.
        let mut batch: Vec<PackageState> = Vec::new();
        for (url, rs) in &adopt {
            cancel.check()?;
            let pi = rs.package_spec.info();
            match resolver::list_deps(&pi, &rm, url, &settings.archs) {
                Ok(deps) => {
                    for dep in deps {
                        if dep.pkg.name == pi.name {
                            continue;
                        }
                        if let Some(ps) = db.fetch_pkg(&dep.pkg.name)? {
                            batch.push(ps);
                        }
                    }
                }
                Err(e) => {
                    error!("error listing dependencies for {}: {}", pi, e);
                    failures += 1;
                    continue;
                }
            }
            let local_path = settings.cache_dir().join(format!("{}.goo", pi.pkg_name()));
            let (app_name, app_reg) = sys.app_association(&rs.package_spec, "");
            batch.push(PackageState {
                source_repo: url.clone(),
                download_url: download::resolve_source(&rs.source, url),
                checksum: rs.checksum.clone(),
                local_path: local_path.to_string_lossy().to_string(),
                unpack_dir: local_path.with_extension("").to_string_lossy().to_string(),
                package_spec: rs.package_spec.clone(),
                installed_app: InstalledApp {
                    name: app_name,
                    reg: app_reg,
                },
                install_date: unix_now(),
                ..Default::default()
            });
        }
        if !batch.is_empty() {
            db.write_state_to_db(&batch)?;
        }
    }

    println!("Found the following unmanaged software (package: application name):");
    for (pkg, app) in &unmanaged {
        println!("  {}: {}", pkg, app);
    }
    Ok(if failures > 0 { 1 } else { 0 })
}

fn cmd_installed(settings: &Settings, pattern: &str, info: bool, files: bool) -> Result<i32> {
    let db = GooDb::new(&settings.db_file(), &settings.state_file())?;
    let state = db.fetch_pkgs(pattern)?;
    println!("Installed packages:");
    for ps in &state {
        let spec = &ps.package_spec;
        println!("  {}", spec);
        if info {
            if !spec.description.is_empty() {
                println!("      {}", spec.description);
            }
            if !spec.authors.is_empty() {
                println!("      authors: {}", spec.authors);
            }
            if ps.install_date != 0 {
                let when = chrono::DateTime::from_timestamp(ps.install_date, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_default();
                println!("      installed: {}", when);
            }
            if !ps.source_repo.is_empty() {
                println!("      repo: {}", ps.source_repo);
            }
        }
        if files {
            for (path, digest) in &ps.installed_files {
                if !digest.is_empty() {
                    println!("      {}", path);
                }
            }
        }
    }
    Ok(0)
}

fn cmd_available(
    settings: &Settings,
    cancel: &CancelToken,
    sources: &Option<String>,
    pattern: &str,
    info: bool,
) -> Result<i32> {
    let dl = downloader(settings)?;
    let rm = repo_map(settings, cancel, &dl, sources)?;
    for (url, repo) in &rm {
        println!("{} (priority {}):", url, repo.priority);
        let mut pkgs: Vec<&googet::goospec::RepoSpec> = repo
            .packages
            .iter()
            .filter(|rs| rs.package_spec.name.starts_with(pattern))
            .collect();
        pkgs.sort_by(|a, b| {
            (&a.package_spec.name, &a.package_spec.arch, &a.package_spec.version).cmp(&(
                &b.package_spec.name,
                &b.package_spec.arch,
                &b.package_spec.version,
            ))
        });
        for rs in pkgs {
            println!("  {}", rs.package_spec);
            if info && !rs.package_spec.description.is_empty() {
                println!("      {}", rs.package_spec.description);
            }
        }
    }
    Ok(0)
}

fn cmd_listrepos(settings: &Settings) -> Result<i32> {
    for entry in repos::repos(&settings.repo_dir())? {
        println!("{}:", entry.name);
        println!("  URL: {}", entry.url);
        println!("  Priority: {}", entry.priority());
        println!("  File: {}", entry.file_name);
    }
    Ok(0)
}

fn cmd_verify(
    settings: &Settings,
    sys: &dyn system::System,
    cancel: &CancelToken,
    packages: &[String],
) -> Result<i32> {
    let dl = downloader(settings)?;
    let _lock = lock::acquire(&settings.lock_file(), settings.lock_file_max_age, sys)?;
    let db = GooDb::new(&settings.db_file(), &settings.state_file())?;

    let mut failures = 0;
    for pkg in packages {
        let pi = PackageInfo::split(pkg);
        let ps = match db.fetch_pkg(&pi.name)? {
            Some(ps) => ps,
            None => {
                eprintln!("Package {} not installed, cannot verify.", pkg);
                failures += 1;
                continue;
            }
        };
        match verify::run_verify_command(cancel, &ps, &dl, sys) {
            Ok(true) => println!("{}: verified", ps.package_spec),
            Ok(false) => {
                println!("{}: FAILED verification", ps.package_spec);
                failures += 1;
            }
            Err(e) => {
                error!("error verifying {:?}: {}", pkg, e);
                eprintln!("error verifying {}: {}", pkg, e);
                failures += 1;
            }
        }
    }
    Ok(if failures > 0 { 1 } else { 0 })
}

fn cmd_clean(settings: &Settings) -> Result<i32> {
    let cache = settings.cache_dir();
    if !cache.exists() {
        println!("Cache is empty.");
        return Ok(0);
    }
    for entry in std::fs::read_dir(&cache)? {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    println!("Cleaned cache directory {}", cache.display());
    Ok(0)
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn confirmation(settings: &Settings, prompt: &str) -> bool {
    if !settings.confirm {
        return true;
    }
    use std::io::Write;
    print!("{} (y/N): ", prompt);
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y" | "yes")
}
