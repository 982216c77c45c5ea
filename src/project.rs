// src/project.rs

//! Wheels built from a local project checkout
//!
//! [`ProjectBuilder`] runs the project's PEP 517 backend through the target
//! interpreter using the `build` package and returns the wheel it wrote.
//! An editable build asks the backend for a PEP 660 wheel, whose payload is
//! an import hook pointing back at the checkout.
//!
//! Build requirements are never installed here. When the interpreter lacks
//! some, the backend's list of missing ones becomes the build error.

use crate::error::{Error, Result};
use crate::fetch::Artifact;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Program handed to `python -c`: project, distribution, output directory
const BUILD_PROGRAM: &str = r#"import sys
from build import ProjectBuilder
project, distribution, outdir = sys.argv[1:4]
builder = ProjectBuilder(project)
missing = builder.check_dependencies(distribution)
if missing:
    sys.exit("missing build requirements: " + ", ".join(sorted(" -> ".join(chain) for chain in missing)))
print(builder.build(distribution, outdir))
"#;

/// Files that mark a directory as a buildable Python project
const PROJECT_MARKERS: &[&str] = &["pyproject.toml", "setup.py", "setup.cfg"];

/// Kind of wheel to ask the backend for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Distribution {
    Wheel,
    #[default]
    Editable,
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Wheel => "wheel",
            Distribution::Editable => "editable",
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds wheels from project directories with a given interpreter
#[derive(Debug, Clone)]
pub struct ProjectBuilder {
    python: PathBuf,
}

impl ProjectBuilder {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// Use the interpreter of the environment at `prefix`
    pub fn for_prefix(prefix: &Path) -> Self {
        let python = if cfg!(windows) {
            prefix.join("python.exe")
        } else {
            prefix.join("bin").join("python")
        };
        Self::new(python)
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    pub fn arguments(&self, project: &Path, distribution: Distribution, out_dir: &Path) -> Vec<String> {
        vec![
            "-c".to_string(),
            BUILD_PROGRAM.to_string(),
            project.display().to_string(),
            distribution.as_str().to_string(),
            out_dir.display().to_string(),
        ]
    }

    /// Build `project` into `out_dir` and describe the resulting wheel
    pub fn build(&self, project: &Path, distribution: Distribution, out_dir: &Path) -> Result<Artifact> {
        let project = fs::canonicalize(project)
            .map_err(|e| Error::Build(format!("project {}: {e}", project.display())))?;
        if !PROJECT_MARKERS.iter().any(|marker| project.join(marker).is_file()) {
            return Err(Error::Build(format!(
                "{} is not a Python project (no {})",
                project.display(),
                PROJECT_MARKERS.join(", ")
            )));
        }
        fs::create_dir_all(out_dir)?;

        info!("Building {} {} with {}", distribution, project.display(), self.python.display());
        let output = Command::new(&self.python)
            .args(self.arguments(&project, distribution, out_dir))
            .current_dir(&project)
            .output()
            .map_err(|e| Error::Build(format!("failed to run {}: {e}", self.python.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or_default();
            return Err(Error::Build(format!(
                "building {} {} failed ({}): {}",
                distribution,
                project.display(),
                output.status,
                reason.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let wheel = built_wheel(&stdout, out_dir)?;
        debug!("Backend wrote {}", wheel.display());
        Artifact::from_wheel(&wheel)
    }
}

/// The wheel the backend reported, or the only wheel in `out_dir`
fn built_wheel(stdout: &str, out_dir: &Path) -> Result<PathBuf> {
    let reported = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| {
            let path = PathBuf::from(line);
            if path.is_absolute() { path } else { out_dir.join(path) }
        })
        .filter(|path| path.extension().is_some_and(|ext| ext == "whl") && path.is_file());
    if let Some(path) = reported {
        return Ok(path);
    }

    let mut wheels: Vec<PathBuf> = fs::read_dir(out_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "whl"))
        .collect();
    match wheels.len() {
        1 => Ok(wheels.remove(0)),
        0 => Err(Error::Build(format!("no wheel was written to {}", out_dir.display()))),
        n => Err(Error::Build(format!(
            "{n} wheels in {}, cannot tell which one was built",
            out_dir.display()
        ))),
    }
}
