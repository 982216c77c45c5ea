// src/solver.rs

//! Target-ecosystem solver adapter
//!
//! The solver is a black box behind [`Solver`]. [`CondaCliSolver`] drives the
//! `conda` command line in `--dry-run --json` mode and maps its JSON report
//! onto a [`Diff`] or a [`SolveError`]. Once a solve succeeds it can also run
//! the real `conda install` into a prefix.

use crate::diagnostics::missing_from_unsatisfiable;
use crate::spec::PackageSpec;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info};

/// Why a solve did not produce a diff
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolveError {
    /// The solver named packages it could not find in any channel
    #[error("packages not found: {}", .0.join(", "))]
    MissingPackages(Vec<String>),

    /// The solver could not satisfy the request; text is its diagnostic
    #[error("unsatisfiable: {0}")]
    Unsatisfiable(String),

    /// Anything else: the solver could not be run or its output was unusable
    #[error("solver failed: {0}")]
    Failed(String),
}

impl SolveError {
    /// Package names this failure points at, if any can be recovered
    pub fn missing_names(&self) -> Vec<String> {
        match self {
            SolveError::MissingPackages(names) => names.clone(),
            SolveError::Unsatisfiable(text) => missing_from_unsatisfiable(text),
            SolveError::Failed(_) => Vec::new(),
        }
    }

    pub fn diagnostic(&self) -> String {
        match self {
            SolveError::MissingPackages(names) => format!("missing: {}", names.join(", ")),
            SolveError::Unsatisfiable(text) | SolveError::Failed(text) => text.clone(),
        }
    }
}

/// One solver invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveRequest {
    /// Channels in priority order; the local repository comes first
    pub channels: Vec<String>,
    /// Restrict to this platform subdir (plus noarch)
    pub subdir: Option<String>,
    pub specs: Vec<PackageSpec>,
    /// Existing environment to solve against; `None` means a fresh one
    pub prefix: Option<PathBuf>,
}

/// A package linked or unlinked by a solution
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
pub struct SolvedPackage {
    pub name: String,
    pub version: String,
    #[serde(alias = "build_string", default)]
    pub build: String,
    #[serde(default)]
    pub channel: String,
}

impl fmt::Display for SolvedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.build)?;
        if !self.channel.is_empty() {
            write!(f, " ({})", self.channel)?;
        }
        Ok(())
    }
}

/// Changes a successful solve would make to the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub removals: Vec<SolvedPackage>,
    pub additions: Vec<SolvedPackage>,
}

impl Diff {
    pub fn contains_addition(&self, name: &str) -> bool {
        self.additions.iter().any(|p| p.name == name)
    }
}

pub trait Solver {
    fn solve(&self, request: &SolveRequest) -> Result<Diff, SolveError>;
}

/// Runs `conda create|install --dry-run --json`
#[derive(Debug, Clone)]
pub struct CondaCliSolver {
    command: String,
}

impl CondaCliSolver {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Command-line arguments for a request; `scratch` is used as the prefix
    /// of a fresh environment
    pub fn arguments(&self, request: &SolveRequest, scratch: &Path) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match &request.prefix {
            Some(prefix) => {
                args.push("install".into());
                args.push("--prefix".into());
                args.push(prefix.display().to_string());
            }
            None => {
                args.push("create".into());
                args.push("--prefix".into());
                args.push(scratch.display().to_string());
            }
        }
        args.extend(["--dry-run", "--json", "--yes", "--override-channels"].map(String::from));
        for channel in &request.channels {
            args.push("--channel".into());
            args.push(channel.clone());
        }
        if let Some(subdir) = &request.subdir {
            args.push("--subdir".into());
            args.push(subdir.clone());
        }
        args.extend(request.specs.iter().map(|s| s.to_string()));
        args
    }
}

impl CondaCliSolver {
    /// Arguments for installing a solved request into `prefix`
    ///
    /// `channels` is the solver's channel list with the local repository
    /// first. When `override_channels` is set, conda's configured channels
    /// are ignored as well.
    pub fn install_arguments(
        &self,
        request: &SolveRequest,
        prefix: &Path,
        override_channels: bool,
    ) -> Vec<String> {
        let mut args: Vec<String> =
            vec!["install".into(), "--prefix".into(), prefix.display().to_string()];
        args.extend(channel_arguments(&request.channels, override_channels));
        args.push("--yes".into());
        args.extend(request.specs.iter().map(|s| s.to_string()));
        args
    }

    /// The command a user can run by hand when the automatic install fails
    pub fn manual_install_command(&self, request: &SolveRequest, override_channels: bool) -> String {
        let mut parts = vec![self.command.clone(), "install".to_string()];
        parts.extend(channel_arguments(&request.channels, override_channels));
        parts.extend(request.specs.iter().map(|s| shell_quote(&s.to_string())));
        parts.join(" ")
    }

    /// Run `conda install` for a request that solved
    pub fn install(
        &self,
        request: &SolveRequest,
        prefix: &Path,
        override_channels: bool,
    ) -> Result<(), SolveError> {
        let args = self.install_arguments(request, prefix, override_channels);
        info!("Installing: {} {}", self.command, args.join(" "));
        let output = Command::new(&self.command)
            .args(&args)
            .output()
            .map_err(|e| SolveError::Failed(format!("failed to run {}: {e}", self.command)))?;

        if output.status.success() {
            info!("Installation into {} completed", prefix.display());
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("Installation failed: {}", stderr.trim());
        Err(SolveError::Failed(format!(
            "{} install exited with {}",
            self.command, output.status
        )))
    }
}

fn channel_arguments(channels: &[String], override_channels: bool) -> Vec<String> {
    let mut args = Vec::new();
    for channel in channels {
        args.push("--channel".to_string());
        args.push(channel.clone());
    }
    if override_channels {
        args.push("--override-channels".to_string());
    }
    args
}

fn shell_quote(arg: &str) -> String {
    if arg.chars().all(|c| c.is_ascii_alphanumeric() || "-_.:/=".contains(c)) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

impl Solver for CondaCliSolver {
    fn solve(&self, request: &SolveRequest) -> Result<Diff, SolveError> {
        let scratch = tempfile::TempDir::new()
            .map_err(|e| SolveError::Failed(format!("cannot create scratch prefix: {e}")))?;
        let scratch_prefix = scratch.path().join("env");
        let args = self.arguments(request, &scratch_prefix);

        info!("Solving: {} {}", self.command, args.join(" "));
        let output = Command::new(&self.command)
            .args(&args)
            .output()
            .map_err(|e| SolveError::Failed(format!("failed to run {}: {e}", self.command)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(SolveError::Failed(format!(
                "{} exited with {} and no JSON: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_report(&stdout)
    }
}

fn packages_of(actions: &Value, key: &str) -> Result<Vec<SolvedPackage>, SolveError> {
    match actions.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list) => {
            let mut packages: Vec<SolvedPackage> = serde_json::from_value(list.clone())
                .map_err(|e| SolveError::Failed(format!("unexpected {key} entries: {e}")))?;
            packages.sort();
            Ok(packages)
        }
    }
}

fn spec_name(raw: &str) -> String {
    // conda reports `channel::name[...]` or a MatchSpec string
    let raw = raw.rsplit("::").next().unwrap_or(raw);
    PackageSpec::parse(raw)
        .map(|s| s.name)
        .unwrap_or_else(|_| raw.trim().to_string())
}

/// Map conda's `--json` report to a diff or an error
pub fn parse_report(stdout: &str) -> Result<Diff, SolveError> {
    let report: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| SolveError::Failed(format!("solver output is not JSON: {e}")))?;

    if let Some(exception) = report.get("exception_name").and_then(Value::as_str) {
        let message = report
            .get("message")
            .or_else(|| report.get("error"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!("Solver raised {}", exception);
        return Err(match exception {
            "PackagesNotFoundError" | "ResolvePackageNotFound" => {
                let mut names: Vec<String> = report
                    .get("packages")
                    .and_then(Value::as_array)
                    .map(|list| list.iter().filter_map(Value::as_str).map(spec_name).collect())
                    .unwrap_or_default();
                names.sort();
                names.dedup();
                if names.is_empty() {
                    SolveError::Unsatisfiable(message)
                } else {
                    SolveError::MissingPackages(names)
                }
            }
            "LibMambaUnsatisfiableError" | "UnsatisfiableError" => {
                SolveError::Unsatisfiable(message)
            }
            other => SolveError::Failed(format!("{other}: {message}")),
        });
    }

    if report.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(SolveError::Failed(format!("solver reported failure: {report}")));
    }

    let Some(actions) = report.get("actions") else {
        // "All requested packages already installed"
        return Ok(Diff::default());
    };
    Ok(Diff {
        removals: packages_of(actions, "UNLINK")?,
        additions: packages_of(actions, "LINK")?,
    })
}
