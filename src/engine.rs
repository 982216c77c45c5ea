// src/engine.rs

//! Cross-ecosystem convergence loop
//!
//! [`ConvergenceEngine::resolve`] asks the solver for a solution, and each time
//! it reports packages it cannot find, fetches those from PyPI, converts them
//! into the local repository, reindexes and asks again. The loop stops on
//! success, when a failure teaches nothing new (every missing name was
//! already converted), or after `max_attempts` solver calls.

use crate::builder::{BuildOptions, PackageBuilder};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::index::Repository;
use crate::requirement::Requirement;
use crate::solver::{SolveError, SolveRequest, SolvedPackage, Solver};
use crate::spec::PackageSpec;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    pub max_attempts: usize,
    /// Use only the local repository, not the upstream channels
    pub override_channels: bool,
    /// Convert the requested packages before the first solve
    pub prefetch_requested: bool,
    /// Solve against an existing environment
    pub prefix: Option<PathBuf>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            override_channels: false,
            prefetch_requested: false,
            prefix: None,
        }
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub removals: Vec<SolvedPackage>,
    pub additions: Vec<SolvedPackage>,
    /// Solver calls made, including the successful one
    pub attempts: usize,
    /// Archives written into the repository along the way
    pub converted: Vec<PathBuf>,
}

/// Working state of one `resolve` call
#[derive(Debug, Default)]
struct ResolutionState {
    missing: BTreeSet<String>,
    fetched: BTreeSet<String>,
    converted: Vec<PathBuf>,
    builds: usize,
}

impl ResolutionState {
    fn missing(&self) -> Vec<String> {
        self.missing.iter().cloned().collect()
    }
}

pub struct ConvergenceEngine<S, F> {
    repo: Repository,
    solver: S,
    fetcher: F,
    builder: PackageBuilder,
    channels: Vec<String>,
}

impl<S: Solver, F: Fetcher> ConvergenceEngine<S, F> {
    pub fn new(repo: Repository, solver: S, fetcher: F, builder: PackageBuilder) -> Self {
        Self {
            repo,
            solver,
            fetcher,
            builder,
            channels: Vec::new(),
        }
    }

    /// Upstream channels searched after the local repository
    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Channel list for the solver, local repository first
    pub fn channels(&self, override_channels: bool) -> Result<Vec<String>> {
        let mut channels = vec![self.repo.channel_url()?];
        if !override_channels {
            channels.extend(self.channels.iter().cloned());
        }
        Ok(channels)
    }

    pub fn resolve(&self, requested: &[PackageSpec], options: &ResolveOptions) -> Result<Resolution> {
        self.repo.ensure_index()?;
        let work = TempDir::new()?;
        let mut state = ResolutionState::default();

        if options.prefetch_requested {
            let mut specs: Vec<&PackageSpec> = requested.iter().collect();
            specs.sort();
            for spec in specs {
                self.convert(spec, true, work.path(), &mut state)?;
                state.fetched.insert(spec.name.clone());
            }
            self.repo.rebuild_index()?;
        }

        let request = SolveRequest {
            channels: self.channels(options.override_channels)?,
            subdir: Some(self.builder.target().subdir.clone()),
            specs: requested.to_vec(),
            prefix: options.prefix.clone(),
        };

        for attempt in 1..=options.max_attempts {
            info!("Solve attempt {}/{}", attempt, options.max_attempts);
            let failure = match self.solver.solve(&request) {
                Ok(diff) => {
                    info!(
                        "Solved after {} attempt(s): {} to add, {} to remove",
                        attempt,
                        diff.additions.len(),
                        diff.removals.len()
                    );
                    return Ok(Resolution {
                        removals: diff.removals,
                        additions: diff.additions,
                        attempts: attempt,
                        converted: state.converted,
                    });
                }
                Err(SolveError::Failed(message)) => return Err(Error::Solver(message)),
                Err(failure) => failure,
            };

            let reported = failure.missing_names();
            state.missing.extend(reported.iter().cloned());
            let new_missing: BTreeSet<String> = reported
                .into_iter()
                .filter(|name| !state.fetched.contains(name))
                .collect();

            if new_missing.is_empty() {
                warn!("No new missing packages after attempt {}", attempt);
                return Err(Error::Unresolvable {
                    attempt,
                    missing: state.missing(),
                    diagnostic: Some(failure.diagnostic()),
                });
            }

            info!("Missing from channels: {:?}", new_missing);
            for name in &new_missing {
                // A requested name keeps the user's constraint and PyPI spelling
                let requested_spec = requested.iter().find(|s| s.name == *name);
                let spec = requested_spec
                    .cloned()
                    .unwrap_or_else(|| PackageSpec::new(name.clone()));
                self.convert(&spec, requested_spec.is_some(), work.path(), &mut state)?;
                state.fetched.insert(name.clone());
            }

            self.repo.rebuild_index()?;
        }

        Err(Error::AttemptsExhausted {
            attempts: options.max_attempts,
            missing: state.missing(),
        })
    }

    /// Fetch and convert one package into the repository
    fn convert(
        &self,
        spec: &PackageSpec,
        requested: bool,
        work: &Path,
        state: &mut ResolutionState,
    ) -> Result<()> {
        let text = spec.to_requirement(self.builder.translator().mapping());
        let requirement = Requirement::parse(&text)
            .map_err(|e| Error::Metadata(format!("cannot look up '{spec}' on PyPI: {e}")))?;

        info!("Fetching {} for {}", text, spec.name);
        let artifact = self
            .fetcher
            .fetch(&requirement, self.builder.target(), &work.join("wheels"))?;

        // The record must carry the name the solver was asked for; an alias
        // would leave the request unsatisfied
        let mapping = self.builder.translator().mapping();
        let skip_name_mapping = requested && mapping.to_conda(&requirement.name) != spec.name;

        state.builds += 1;
        let build_path = work.join(format!("build-{}", state.builds));
        let options = BuildOptions {
            skip_name_mapping,
            ..Default::default()
        };
        match self.builder.build(&artifact, &build_path, self.repo.root(), &options) {
            Ok(built) => {
                info!("Converted {} into {}", artifact.path.display(), built.path.display());
                state.converted.push(built.path);
            }
            Err(Error::ArchiveExists(path)) => {
                info!("Skipping {}: already in the repository", path.display());
            }
            Err(e) => return Err(e),
        }
        debug!("Build tree {} done", build_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Artifact;
    use crate::mapping::NameMapping;
    use crate::solver::Diff;
    use crate::tags::TargetEnvironment;
    use crate::translate::Translator;
    use std::cell::Cell;
    use std::sync::Arc;

    struct ScriptedSolver<G: Fn(usize) -> std::result::Result<Diff, SolveError>> {
        calls: Cell<usize>,
        respond: G,
    }

    impl<G: Fn(usize) -> std::result::Result<Diff, SolveError>> Solver for ScriptedSolver<G> {
        fn solve(&self, _request: &SolveRequest) -> std::result::Result<Diff, SolveError> {
            self.calls.set(self.calls.get() + 1);
            (self.respond)(self.calls.get())
        }
    }

    struct NoFetch;

    impl Fetcher for NoFetch {
        fn fetch(&self, req: &Requirement, _: &TargetEnvironment, _: &Path) -> Result<Artifact> {
            Err(Error::PackageNotFound(req.name.clone()))
        }
    }

    fn engine<G>(repo: &Path, respond: G) -> ConvergenceEngine<ScriptedSolver<G>, NoFetch>
    where
        G: Fn(usize) -> std::result::Result<Diff, SolveError>,
    {
        let translator = Translator::new(Arc::new(NameMapping::embedded().unwrap()));
        let builder = PackageBuilder::new(translator, TargetEnvironment::new("3.12", "linux-64").unwrap());
        ConvergenceEngine::new(
            Repository::new(repo),
            ScriptedSolver {
                calls: Cell::new(0),
                respond,
            },
            NoFetch,
            builder,
        )
    }

    #[test]
    fn test_immediate_success() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path(), |_| Ok(Diff::default()));
        let resolution = engine
            .resolve(&[PackageSpec::new("numpy")], &ResolveOptions::default())
            .unwrap();
        assert_eq!(resolution.attempts, 1);
        assert!(dir.path().join("noarch/repodata.json").exists());
    }

    #[test]
    fn test_no_names_is_unresolvable() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path(), |_| {
            Err(SolveError::Unsatisfiable("a conflicts with b".to_string()))
        });
        let err = engine
            .resolve(&[PackageSpec::new("a")], &ResolveOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Unresolvable { attempt: 1, .. }));
        assert!(err.to_string().contains("a conflicts with b"));
        assert_eq!(engine.solver.calls.get(), 1);
    }

    #[test]
    fn test_fetch_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path(), |_| {
            Err(SolveError::MissingPackages(vec!["ghost".to_string()]))
        });
        let err = engine
            .resolve(&[PackageSpec::new("ghost")], &ResolveOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::PackageNotFound(ref n) if n == "ghost"));
        assert_eq!(engine.solver.calls.get(), 1);
    }

    #[test]
    fn test_solver_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path(), |_| Err(SolveError::Failed("no conda".to_string())));
        let err = engine
            .resolve(&[PackageSpec::new("x")], &ResolveOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Solver(_)));
    }

    #[test]
    fn test_zero_attempts() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path(), |_| Ok(Diff::default()));
        let options = ResolveOptions {
            max_attempts: 0,
            ..Default::default()
        };
        let err = engine.resolve(&[PackageSpec::new("x")], &options).unwrap_err();
        assert!(matches!(err, Error::AttemptsExhausted { attempts: 0, .. }));
        assert_eq!(engine.solver.calls.get(), 0);
    }

    #[test]
    fn test_channel_order() {
        let dir = TempDir::new().unwrap();
        let engine = engine(dir.path(), |_| Ok(Diff::default()))
            .with_channels(vec!["conda-forge".to_string()]);
        let channels = engine.channels(false).unwrap();
        assert!(channels[0].starts_with("file://"));
        assert_eq!(channels[1], "conda-forge");
        assert_eq!(engine.channels(true).unwrap().len(), 1);
    }
}
