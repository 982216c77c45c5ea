// src/commands.rs
//! Command handlers for the graft CLI

use anyhow::{Context, Result};
use graft::builder::{BuildMode, BuildOptions, BuiltPackage, PackageBuilder};
use graft::config::GraftConfig;
use graft::engine::{ConvergenceEngine, ResolveOptions};
use graft::fetch::{Artifact, Fetcher, FindLinksFetcher, PypiFetcher};
use graft::index::Repository;
use graft::mapping::NameMapping;
use graft::project::{Distribution, ProjectBuilder};
use graft::solver::{CondaCliSolver, SolveRequest};
use graft::spec::PackageSpec;
use graft::translate::Translator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

fn load_mapping(config: &GraftConfig) -> Result<Arc<NameMapping>> {
    let mapping = NameMapping::load(config.mapping_file.as_deref())
        .context("Failed to load the name mapping table")?;
    Ok(Arc::new(mapping))
}

fn package_builder(config: &GraftConfig) -> Result<PackageBuilder> {
    let target = config.target()?;
    let translator =
        Translator::new(load_mapping(config)?).with_environment(target.marker_environment());
    Ok(PackageBuilder::new(translator, target))
}

/// Resolve `specs`, converting missing packages into the repository
pub fn cmd_convert(
    config: &GraftConfig,
    specs: &[String],
    prefix: Option<PathBuf>,
    prefetch: bool,
    dry_run: bool,
) -> Result<()> {
    let specs = specs
        .iter()
        .map(|s| PackageSpec::parse(s))
        .collect::<graft::Result<Vec<_>>>()?;
    info!("Resolving {} spec(s) into {}", specs.len(), config.repo.display());

    let options = ResolveOptions {
        max_attempts: config.max_attempts,
        override_channels: config.override_channels,
        prefetch_requested: prefetch,
        prefix,
    };

    if config.find_links.is_empty() {
        let fetcher = PypiFetcher::new(config.index_urls.clone())?;
        run_convert(config, fetcher, &specs, &options, dry_run)
    } else {
        let fetcher = FindLinksFetcher::new(config.find_links.clone());
        run_convert(config, fetcher, &specs, &options, dry_run)
    }
}

fn run_convert<F: Fetcher>(
    config: &GraftConfig,
    fetcher: F,
    specs: &[PackageSpec],
    options: &ResolveOptions,
    dry_run: bool,
) -> Result<()> {
    let repo = Repository::new(&config.repo).with_zst(config.write_zst);
    let solver = CondaCliSolver::new(&config.solver_command);
    let installer = solver.clone();
    let engine = ConvergenceEngine::new(repo, solver, fetcher, package_builder(config)?)
        .with_channels(config.channels.clone());

    let resolution = engine.resolve(specs, options)?;

    if !resolution.converted.is_empty() {
        println!("Converted {} package(s):", resolution.converted.len());
        for path in &resolution.converted {
            println!("  {}", path.display());
        }
    }
    if resolution.removals.is_empty() && resolution.additions.is_empty() {
        println!("Nothing to do: all requested packages are already installed");
    }
    for package in &resolution.removals {
        println!("  - {}", package);
    }
    for package in &resolution.additions {
        println!("  + {}", package);
    }
    println!(
        "Solved in {} attempt(s); channel: {}",
        resolution.attempts,
        engine.repository().channel_url()?
    );

    if dry_run || (resolution.removals.is_empty() && resolution.additions.is_empty()) {
        return Ok(());
    }
    let request = SolveRequest {
        channels: engine.channels(options.override_channels)?,
        subdir: Some(config.subdir.clone()),
        specs: specs.to_vec(),
        prefix: options.prefix.clone(),
    };
    let manual = installer.manual_install_command(&request, options.override_channels);
    let Some(prefix) = &options.prefix else {
        println!("No --prefix given; to install, run:");
        println!("  {manual}");
        return Ok(());
    };
    if let Err(e) = installer.install(&request, prefix, options.override_channels) {
        error!("{e}");
        println!("Manual installation: {manual}");
        anyhow::bail!("installing into {} failed", prefix.display());
    }
    println!("Installed into {}", prefix.display());
    Ok(())
}

/// Convert one wheel file
pub fn cmd_wheel(
    config: &GraftConfig,
    wheel: &Path,
    output: &Path,
    editable: Option<PathBuf>,
    skip_name_mapping: bool,
    build_number: u64,
) -> Result<()> {
    info!("Converting wheel: {}", wheel.display());
    let artifact = Artifact::from_wheel(wheel)?;
    let builder = package_builder(config)?;

    let options = BuildOptions {
        mode: match editable {
            Some(project) => BuildMode::Editable { project },
            None => BuildMode::Normal,
        },
        skip_name_mapping,
        build_number,
    };

    let work = tempfile::TempDir::new().context("Failed to create build directory")?;
    let built = builder.build(&artifact, &work.path().join("build"), output, &options)?;
    print_built(&built);
    Ok(())
}

/// Build a project checkout with its Python backend, then convert the wheel
pub fn cmd_project(
    config: &GraftConfig,
    project: &Path,
    wheel: bool,
    output: &Path,
    prefix: Option<&Path>,
    skip_name_mapping: bool,
) -> Result<()> {
    let distribution = if wheel { Distribution::Wheel } else { Distribution::Editable };
    let python = match prefix {
        Some(prefix) => ProjectBuilder::for_prefix(prefix),
        None => ProjectBuilder::new(&config.build_python),
    };

    let work = tempfile::TempDir::new().context("Failed to create build directory")?;
    let artifact = python.build(project, distribution, &work.path().join("dist"))?;

    let options = BuildOptions {
        mode: match distribution {
            Distribution::Editable => BuildMode::Editable {
                project: project.to_path_buf(),
            },
            Distribution::Wheel => BuildMode::Normal,
        },
        skip_name_mapping,
        build_number: 0,
    };
    let built = package_builder(config)?.build(&artifact, &work.path().join("build"), output, &options)?;
    print_built(&built);
    Ok(())
}

fn print_built(built: &BuiltPackage) {
    println!("Built {}", built.path.display());
    println!("  Name: {}", built.record.name);
    println!("  Version: {}", built.record.version);
    println!("  Subdir: {}", built.record.subdir);
    println!("  Files: {}", built.manifest.len());
    println!("  Depends: {}", built.record.depends.join(", "));
    for (extra, depends) in &built.record.extras {
        println!("  Extra [{}]: {}", extra, depends.join(", "));
    }
}

/// Rebuild the repository index
pub fn cmd_index(config: &GraftConfig) -> Result<()> {
    info!("Indexing {}", config.repo.display());
    let repo = Repository::new(&config.repo).with_zst(config.write_zst);
    let counts = repo.rebuild_index()?;
    println!("Indexed {}", repo.root().display());
    for (subdir, count) in counts {
        println!("  {}: {} package(s)", subdir, count);
    }
    Ok(())
}

/// Query the alias table
pub fn cmd_mapping(config: &GraftConfig, name: Option<&str>, reverse: bool, stats: bool) -> Result<()> {
    let mapping = load_mapping(config)?;

    if stats {
        let stats = mapping.stats();
        println!("{} mapped package(s)", stats.total);
        for (source, count) in &stats.by_source {
            println!("  {}: {}", source, count);
        }
        return Ok(());
    }

    let Some(name) = name else {
        anyhow::bail!("a package name is required");
    };
    if reverse {
        // Many PyPI names can share one conda name; this is a best guess
        println!("{} -> {} (PyPI)", name, mapping.to_pypi(name));
    } else if mapping.has_mapping(name) {
        let entry = mapping.info(name);
        println!("{} -> {} (conda)", name, entry.conda_name);
        if let Some(import) = &entry.import_name {
            println!("  Import name: {}", import);
        }
        if let Some(source) = &entry.mapping_source {
            println!("  Source: {}", source);
        }
    } else {
        println!("{} -> {} (conda, unmapped)", name, mapping.to_conda(name));
    }
    Ok(())
}
