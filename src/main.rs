// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use graft::config::GraftConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; -v only changes the default
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = GraftConfig::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Convert {
            specs,
            repo,
            override_channels,
            channels,
            max_attempts,
            prefix,
            python,
            subdir,
            prefetch,
            find_links,
            dry_run,
        }) => {
            if let Some(repo) = repo {
                config.repo = repo;
            }
            if override_channels {
                config.override_channels = true;
            }
            if !channels.is_empty() {
                config.channels = channels;
            }
            if let Some(max_attempts) = max_attempts {
                config.max_attempts = max_attempts;
            }
            if let Some(python) = python {
                config.python = python;
            }
            if let Some(subdir) = subdir {
                config.subdir = subdir;
            }
            if !find_links.is_empty() {
                config.find_links = find_links;
            }
            config.validate()?;
            commands::cmd_convert(&config, &specs, prefix, prefetch, dry_run)
        }
        Some(Commands::Wheel {
            wheel,
            output,
            editable,
            skip_name_mapping,
            build_number,
            python,
            subdir,
        }) => {
            if let Some(python) = python {
                config.python = python;
            }
            if let Some(subdir) = subdir {
                config.subdir = subdir;
            }
            config.validate()?;
            commands::cmd_wheel(&config, &wheel, &output, editable, skip_name_mapping, build_number)
        }
        Some(Commands::Project {
            path,
            wheel,
            output,
            prefix,
            build_python,
            skip_name_mapping,
        }) => {
            if let Some(build_python) = build_python {
                config.build_python = build_python;
            }
            config.validate()?;
            let output = output.unwrap_or_else(|| path.join("build"));
            commands::cmd_project(&config, &path, wheel, &output, prefix.as_deref(), skip_name_mapping)
        }
        Some(Commands::Index { repo }) => {
            if let Some(repo) = repo {
                config.repo = repo;
            }
            commands::cmd_index(&config)
        }
        Some(Commands::Mapping {
            name,
            reverse,
            stats,
        }) => commands::cmd_mapping(&config, name.as_deref(), reverse, stats),
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "graft", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("graft v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'graft --help' for usage information");
            Ok(())
        }
    }
}
