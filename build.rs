// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: local repository directory
fn repo_arg() -> Arg {
    Arg::new("repo")
        .long("repo")
        .value_name("DIR")
        .help("Local repository that converted packages are written to")
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn build_cli() -> Command {
    Command::new("graft")
        .version(env!("CARGO_PKG_VERSION"))
        .author("graft contributors")
        .about("Satisfy conda environments with packages converted from PyPI wheels")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Configuration file (default: $XDG_CONFIG_HOME/graft/config.toml)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log at debug level unless RUST_LOG says otherwise"),
        )
        .subcommand(
            Command::new("convert")
                .about("Solve for packages, converting whatever conda channels lack from PyPI")
                .arg(Arg::new("specs").required(true).num_args(1..).help("Package specs"))
                .arg(repo_arg())
                .arg(flag("override-channels", "Search only the local repository"))
                .arg(Arg::new("channel").short('C').long("channel").help("Upstream channel (repeatable)"))
                .arg(Arg::new("max-attempts").long("max-attempts").help("Maximum number of solver attempts"))
                .arg(Arg::new("prefix").short('p').long("prefix").help("Solve against this existing environment"))
                .arg(Arg::new("python").long("python").help("Target Python version (major.minor)"))
                .arg(Arg::new("subdir").long("subdir").help("Target platform subdir"))
                .arg(flag("prefetch", "Convert the requested packages before the first solve"))
                .arg(Arg::new("find-links").long("find-links").help("Directory of wheels to use instead of the index"))
                .arg(flag("dry-run", "Solve and convert, but leave the environment untouched")),
        )
        .subcommand(
            Command::new("wheel")
                .about("Convert a single wheel into a .conda package")
                .arg(Arg::new("wheel").required(true).help("Path to the .whl file"))
                .arg(Arg::new("output").short('o').long("output").default_value(".").help("Output directory"))
                .arg(Arg::new("editable").long("editable").value_name("PROJECT_DIR").help("Build an editable package"))
                .arg(flag("skip-name-mapping", "Keep the PyPI name instead of its conda alias"))
                .arg(Arg::new("build-number").long("build-number").default_value("0").help("Build number"))
                .arg(Arg::new("python").long("python").help("Target Python version for platform wheels"))
                .arg(Arg::new("subdir").long("subdir").help("Target platform subdir for platform wheels")),
        )
        .subcommand(
            Command::new("project")
                .about("Build a local project checkout and convert it (editable by default)")
                .arg(Arg::new("path").required(true).help("Project directory"))
                .arg(flag("wheel", "Build a regular wheel instead of an editable one"))
                .arg(Arg::new("output").short('o').long("output").help("Output directory (default: <PATH>/build)"))
                .arg(Arg::new("prefix").short('p').long("prefix").help("Build with the interpreter of this environment"))
                .arg(Arg::new("build-python").long("build-python").value_name("EXE").help("Interpreter used when no prefix is given"))
                .arg(flag("skip-name-mapping", "Keep the PyPI name instead of its conda alias")),
        )
        .subcommand(
            Command::new("index")
                .about("Rebuild the repository index from the archives on disk")
                .arg(repo_arg()),
        )
        .subcommand(
            Command::new("mapping")
                .about("Look up a name in the PyPI/conda alias table")
                .arg(Arg::new("name").help("Package name"))
                .arg(flag("reverse", "Treat the name as a conda name and map it to PyPI"))
                .arg(flag("stats", "Print table statistics instead")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=OUT_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = out_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    if let Err(e) = fs::write(man_dir.join("graft.1"), buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
