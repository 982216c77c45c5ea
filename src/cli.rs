// src/cli.rs
//! CLI definitions for graft
//!
//! Definitions only; the handlers are in the `commands` module.
//! Values given here override the configuration file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "graft")]
#[command(author = "graft contributors")]
#[command(version)]
#[command(about = "Satisfy conda environments with packages converted from PyPI wheels", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/graft/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Solve for packages, converting whatever conda channels lack from PyPI
    Convert {
        /// Package specs (`name`, `name >=1.0`, `name==1.0`)
        #[arg(required = true)]
        specs: Vec<String>,

        /// Local repository that converted packages are written to
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Search only the local repository, not the upstream channels
        #[arg(long)]
        override_channels: bool,

        /// Upstream channel (repeatable; replaces the configured list)
        #[arg(short = 'C', long = "channel")]
        channels: Vec<String>,

        /// Maximum number of solver attempts
        #[arg(long)]
        max_attempts: Option<usize>,

        /// Solve against this existing environment
        #[arg(short, long)]
        prefix: Option<PathBuf>,

        /// Target Python version (major.minor)
        #[arg(long)]
        python: Option<String>,

        /// Target platform subdir (e.g. linux-64)
        #[arg(long)]
        subdir: Option<String>,

        /// Convert the requested packages before the first solve
        #[arg(long)]
        prefetch: bool,

        /// Directory of wheels to use instead of the package index (repeatable)
        #[arg(long)]
        find_links: Vec<PathBuf>,

        /// Solve and convert, but leave the environment untouched
        #[arg(long)]
        dry_run: bool,
    },

    /// Convert a single wheel into a .conda package
    Wheel {
        /// Path to the .whl file
        wheel: PathBuf,

        /// Output directory (a subdir per platform is created beneath it)
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Build an editable package pointing at this project checkout
        #[arg(long, value_name = "PROJECT_DIR")]
        editable: Option<PathBuf>,

        /// Keep the PyPI name instead of its conda alias
        #[arg(long)]
        skip_name_mapping: bool,

        /// Build number recorded in the package
        #[arg(long, default_value = "0")]
        build_number: u64,

        /// Target Python version (major.minor) for platform wheels
        #[arg(long)]
        python: Option<String>,

        /// Target platform subdir for platform wheels
        #[arg(long)]
        subdir: Option<String>,
    },

    /// Build a local project checkout and convert it (editable by default)
    Project {
        /// Project directory containing pyproject.toml or setup.py
        path: PathBuf,

        /// Build a regular wheel instead of an editable one
        #[arg(long)]
        wheel: bool,

        /// Output directory (default: <PATH>/build)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Build with the interpreter of this environment
        #[arg(short, long)]
        prefix: Option<PathBuf>,

        /// Interpreter used for the build when no prefix is given
        #[arg(long, value_name = "EXE", conflicts_with = "prefix")]
        build_python: Option<String>,

        /// Keep the PyPI name instead of its conda alias
        #[arg(long)]
        skip_name_mapping: bool,
    },

    /// Rebuild the repository index from the archives on disk
    Index {
        /// Repository directory
        #[arg(long)]
        repo: Option<PathBuf>,
    },

    /// Look up a name in the PyPI/conda alias table
    Mapping {
        /// Package name
        #[arg(required_unless_present = "stats")]
        name: Option<String>,

        /// Treat the name as a conda name and map it to PyPI
        #[arg(long)]
        reverse: bool,

        /// Print table statistics instead
        #[arg(long)]
        stats: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
