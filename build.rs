// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("googet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("GooGet package manager")
        .arg(
            Arg::new("root")
                .long("root")
                .value_name("DIR")
                .help("GooGet root directory"),
        )
        .arg(
            Arg::new("noconfirm")
                .long("noconfirm")
                .action(ArgAction::SetTrue)
                .help("Never prompt for confirmation"),
        )
        .subcommand(
            Command::new("install")
                .about("Download and install packages and their dependencies")
                .arg(Arg::new("packages").required(true).num_args(1..))
                .arg(Arg::new("reinstall").long("reinstall").action(ArgAction::SetTrue))
                .arg(Arg::new("redownload").long("redownload").action(ArgAction::SetTrue))
                .arg(Arg::new("db_only").long("db-only").action(ArgAction::SetTrue))
                .arg(Arg::new("dry_run").long("dry-run").action(ArgAction::SetTrue))
                .arg(Arg::new("sources").long("sources").value_name("URLS")),
        )
        .subcommand(
            Command::new("remove")
                .about("Uninstall packages and their dependents")
                .arg(Arg::new("packages").required(true).num_args(1..))
                .arg(Arg::new("db_only").long("db-only").action(ArgAction::SetTrue))
                .arg(Arg::new("dry_run").long("dry-run").action(ArgAction::SetTrue)),
        )
        .subcommand(
            Command::new("update")
                .about("Update installed packages to the latest available versions"),
        )
        .subcommand(Command::new("check").about("Find unmanaged software known to the repos"))
        .subcommand(Command::new("installed").about("List installed packages"))
        .subcommand(Command::new("available").about("List packages available in the repos"))
        .subcommand(
            Command::new("addrepo")
                .about("Add a repository")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("url").required(true)),
        )
        .subcommand(
            Command::new("rmrepo")
                .about("Remove a repository")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(Command::new("listrepos").about("List configured repositories"))
        .subcommand(
            Command::new("verify")
                .about("Run the verify command of installed packages")
                .arg(Arg::new("packages").required(true).num_args(1..)),
        )
        .subcommand(Command::new("clean").about("Empty the download cache"))
}

fn main() -> std::io::Result<()> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    let cmd = build_cli();
    let man = Man::new(cmd.clone());
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    fs::write(man_dir.join("googet.1"), buf)?;

    for sub in cmd.get_subcommands() {
        let man = Man::new(sub.clone());
        let mut buf = Vec::new();
        man.render(&mut buf)?;
        fs::write(man_dir.join(format!("googet-{}.1", sub.get_name())), buf)?;
    }

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
