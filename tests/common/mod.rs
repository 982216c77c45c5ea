// tests/common/mod.rs

//! Shared test utilities for integration tests: wheel synthesis and an
//! in-process solver that reads the local repository's index.

#![allow(dead_code)]

use graft::index::Repository;
use graft::mapping::NameMapping;
use graft::solver::{Diff, SolveError, SolveRequest, SolvedPackage, Solver};
use graft::tags::TargetEnvironment;
use graft::translate::Translator;
use graft::PackageBuilder;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::SimpleFileOptions;

/// Write `<name>-<version>-py3-none-any.whl` into `dir`.
///
/// `requires` become `Requires-Dist` lines; `extra_files` are added verbatim.
pub fn write_wheel(
    dir: &Path,
    name: &str,
    version: &str,
    requires: &[&str],
    extra_files: &[(&str, &str)],
) -> PathBuf {
    write_tagged_wheel(dir, name, version, "py3-none-any", requires, extra_files)
}

pub fn write_tagged_wheel(
    dir: &Path,
    name: &str,
    version: &str,
    tag: &str,
    requires: &[&str],
    extra_files: &[(&str, &str)],
) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let dist = name.replace('-', "_");
    let path = dir.join(format!("{dist}-{version}-{tag}.whl"));
    let dist_info = format!("{dist}-{version}.dist-info");

    let mut metadata = format!(
        "Metadata-Version: 2.1\nName: {name}\nVersion: {version}\nSummary: Test package {name}\nLicense: MIT\nRequires-Python: >=3.8\n"
    );
    for req in requires {
        metadata.push_str(&format!("Requires-Dist: {req}\n"));
    }

    let mut files: Vec<(String, String)> = vec![
        (format!("{dist}/__init__.py"), format!("NAME = {name:?}\n")),
        (format!("{dist_info}/METADATA"), metadata),
        (format!("{dist_info}/WHEEL"), format!("Wheel-Version: 1.0\nRoot-Is-Purelib: true\nTag: {tag}\n")),
    ];
    for (file, data) in extra_files {
        files.push((file.to_string(), data.to_string()));
    }
    let mut record: String = files.iter().map(|(f, _)| format!("{f},,\n")).collect();
    record.push_str(&format!("{dist_info}/RECORD,,\n"));
    files.push((format!("{dist_info}/RECORD"), record));

    let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
    for (file, data) in &files {
        zip.start_file(file.as_str(), SimpleFileOptions::default()).unwrap();
        zip.write_all(data.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path
}

/// Write an sdist-looking file (never a wheel)
pub fn write_sdist(dir: &Path, name: &str, version: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{name}-{version}.tar.gz"));
    std::fs::write(&path, b"not really a tarball").unwrap();
    path
}

pub fn target() -> TargetEnvironment {
    TargetEnvironment::new("3.12", "linux-64").unwrap()
}

pub fn package_builder() -> PackageBuilder {
    let translator = Translator::new(Arc::new(NameMapping::embedded().unwrap()));
    PackageBuilder::new(translator, target())
}

/// Solver that knows a fixed set of upstream packages plus whatever the local
/// repository's `repodata.json` lists, and follows `depends` transitively
pub struct RepoSolver {
    repo: PathBuf,
    upstream: BTreeSet<String>,
    calls: Cell<usize>,
}

impl RepoSolver {
    pub fn new(repo: &Path, upstream: &[&str]) -> Self {
        Self {
            repo: repo.to_path_buf(),
            upstream: upstream.iter().map(|s| s.to_string()).collect(),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    fn local_packages(&self, subdir: &str) -> BTreeMap<String, (SolvedPackage, Vec<String>)> {
        let repo = Repository::new(&self.repo);
        let mut found = BTreeMap::new();
        for subdir in ["noarch", subdir] {
            let Ok(repodata) = repo.read_repodata(subdir) else {
                continue;
            };
            for entry in repodata.packages_conda.values() {
                let name = entry["name"].as_str().unwrap().to_string();
                let package = SolvedPackage {
                    name: name.clone(),
                    version: entry["version"].as_str().unwrap().to_string(),
                    build: entry["build"].as_str().unwrap().to_string(),
                    channel: "local".to_string(),
                };
                let depends = entry["depends"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|d| d.as_str().unwrap().split_whitespace().next().unwrap().to_string())
                    .collect();
                found.insert(name, (package, depends));
            }
        }
        found
    }
}

// The engine owns its solver; lending a reference keeps the call count visible
impl Solver for &RepoSolver {
    fn solve(&self, request: &SolveRequest) -> Result<Diff, SolveError> {
        (**self).solve(request)
    }
}

impl Solver for RepoSolver {
    fn solve(&self, request: &SolveRequest) -> Result<Diff, SolveError> {
        self.calls.set(self.calls.get() + 1);
        let subdir = request.subdir.clone().unwrap_or_else(|| "linux-64".to_string());
        let local = self.local_packages(&subdir);

        let mut queue: VecDeque<String> = request.specs.iter().map(|s| s.name.clone()).collect();
        let mut seen = BTreeSet::new();
        let mut additions = Vec::new();
        let mut missing = BTreeSet::new();

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some((package, depends)) = local.get(&name) {
                additions.push(package.clone());
                queue.extend(depends.iter().cloned());
            } else if self.upstream.contains(&name) {
                additions.push(SolvedPackage {
                    name: name.clone(),
                    version: "1.0".to_string(),
                    build: "0".to_string(),
                    channel: "conda-forge".to_string(),
                });
            } else {
                missing.insert(name);
            }
        }

        if missing.is_empty() {
            additions.sort();
            Ok(Diff {
                removals: Vec::new(),
                additions,
            })
        } else {
            Err(SolveError::MissingPackages(missing.into_iter().collect()))
        }
    }
}

/// Solver that reports the same missing package forever
pub struct StuckSolver {
    pub missing: String,
    pub calls: Cell<usize>,
}

impl Solver for &StuckSolver {
    fn solve(&self, _request: &SolveRequest) -> Result<Diff, SolveError> {
        self.calls.set(self.calls.get() + 1);
        Err(SolveError::Unsatisfiable(format!(
            "Encountered problems while solving:\n  - nothing provides {} needed by app-1.0-0",
            self.missing
        )))
    }
}
