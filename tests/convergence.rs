// tests/convergence.rs

//! End-to-end runs of the convergence loop against a local wheel directory
//! and an in-process solver.

mod common;

use common::{package_builder, write_sdist, write_wheel, RepoSolver, StuckSolver};
use graft::fetch::FindLinksFetcher;
use graft::{ConvergenceEngine, Error, PackageSpec, Repository, ResolveOptions};
use std::cell::Cell;
use std::path::Path;
use tempfile::TempDir;

const UPSTREAM: &[&str] = &["python", "requests", "numpy"];

fn engine<S: graft::Solver>(
    repo: &Path,
    solver: S,
    wheels: &Path,
) -> ConvergenceEngine<S, FindLinksFetcher> {
    ConvergenceEngine::new(
        Repository::new(repo),
        solver,
        FindLinksFetcher::new(vec![wheels.to_path_buf()]),
        package_builder(),
    )
    .with_channels(vec!["conda-forge".to_string()])
}

fn specs(names: &[&str]) -> Vec<PackageSpec> {
    names.iter().map(|n| PackageSpec::parse(n).unwrap()).collect()
}

#[test]
fn test_missing_package_is_converted_then_solved() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    let wheels = temp.path().join("wheels");
    write_wheel(&wheels, "demo-package", "0.1.0", &["requests>=2"], &[]);

    let solver = RepoSolver::new(&repo, UPSTREAM);
    let resolution = engine(&repo, &solver, &wheels)
        .resolve(&specs(&["demo-package"]), &ResolveOptions::default())
        .unwrap();

    assert_eq!(resolution.attempts, 2);
    assert_eq!(solver.calls(), 2);
    assert_eq!(resolution.converted.len(), 1);
    assert!(resolution.additions.iter().any(|p| p.name == "demo-package" && p.channel == "local"));
    assert!(resolution.additions.iter().any(|p| p.name == "requests"));

    let archive = &resolution.converted[0];
    let filename = archive.file_name().unwrap().to_str().unwrap();
    assert!(filename.starts_with("demo-package-0.1.0-pypi_"), "{filename}");
    assert!(archive.starts_with(repo.join("noarch")));

    let repodata = Repository::new(&repo).read_repodata("noarch").unwrap();
    assert!(repodata.packages_conda.contains_key(filename));
}

#[test]
fn test_transitive_pypi_dependencies_converge() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    let wheels = temp.path().join("wheels");
    write_wheel(&wheels, "app", "1.0", &["helper-lib>=0.2"], &[]);
    write_wheel(&wheels, "helper-lib", "0.2.1", &["numpy"], &[]);

    let solver = RepoSolver::new(&repo, UPSTREAM);
    let resolution = engine(&repo, &solver, &wheels)
        .resolve(&specs(&["app"]), &ResolveOptions::default())
        .unwrap();

    assert_eq!(resolution.attempts, 3);
    assert_eq!(resolution.converted.len(), 2);
    let names: Vec<&str> = resolution.additions.iter().map(|p| p.name.as_str()).collect();
    assert!(names.contains(&"app"));
    assert!(names.contains(&"helper-lib"));
    assert!(names.contains(&"numpy"));
}

#[test]
fn test_sdist_only_package_fails_fast() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    let wheels = temp.path().join("wheels");
    write_sdist(&wheels, "ach", "0.2");

    let solver = RepoSolver::new(&repo, UPSTREAM);
    let options = ResolveOptions::default();
    let err = engine(&repo, &solver, &wheels)
        .resolve(&specs(&["ach"]), &options)
        .unwrap_err();

    assert!(matches!(err, Error::NoCompatibleArtifact { .. }), "{err:?}");
    let message = err.to_string();
    assert!(message.contains("wheel"), "{message}");
    assert!(message.contains("source distributions"), "{message}");
    assert!(solver.calls() < options.max_attempts);
}

#[test]
fn test_package_absent_everywhere_is_not_found() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    let wheels = temp.path().join("wheels");
    std::fs::create_dir_all(&wheels).unwrap();

    let solver = RepoSolver::new(&repo, UPSTREAM);
    let err = engine(&repo, &solver, &wheels)
        .resolve(&specs(&["no-such-thing"]), &ResolveOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::PackageNotFound(_)), "{err:?}");
    assert_eq!(solver.calls(), 1);
}

#[test]
fn test_repeated_missing_name_stops_at_fixpoint() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    let wheels = temp.path().join("wheels");
    write_wheel(&wheels, "demo-package", "0.1.0", &[], &[]);

    let solver = StuckSolver {
        missing: "demo-package".to_string(),
        calls: Cell::new(0),
    };
    let err = engine(&repo, &solver, &wheels)
        .resolve(&specs(&["app"]), &ResolveOptions::default())
        .unwrap_err();

    match err {
        Error::Unresolvable {
            attempt,
            missing,
            diagnostic,
        } => {
            assert_eq!(attempt, 2);
            assert_eq!(missing, vec!["demo-package"]);
            assert!(diagnostic.unwrap().contains("nothing provides demo-package"));
        }
        other => panic!("expected Unresolvable, got {other:?}"),
    }
    assert_eq!(solver.calls.get(), 2);
}

#[test]
fn test_attempt_bound_is_respected() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    let wheels = temp.path().join("wheels");
    write_wheel(&wheels, "app", "1.0", &["helper-lib"], &[]);
    write_wheel(&wheels, "helper-lib", "0.2.1", &[], &[]);

    let solver = RepoSolver::new(&repo, UPSTREAM);
    let options = ResolveOptions {
        max_attempts: 2,
        ..Default::default()
    };
    let err = engine(&repo, &solver, &wheels)
        .resolve(&specs(&["app"]), &options)
        .unwrap_err();

    match err {
        Error::AttemptsExhausted { attempts, missing } => {
            assert_eq!(attempts, 2);
            assert_eq!(missing, vec!["app", "helper-lib"]);
        }
        other => panic!("expected AttemptsExhausted, got {other:?}"),
    }
    assert_eq!(solver.calls(), 2);
}

#[test]
fn test_prefetch_converts_before_first_solve() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    let wheels = temp.path().join("wheels");
    write_wheel(&wheels, "demo-package", "0.1.0", &["requests"], &[]);

    let solver = RepoSolver::new(&repo, UPSTREAM);
    let options = ResolveOptions {
        prefetch_requested: true,
        ..Default::default()
    };
    let resolution = engine(&repo, &solver, &wheels)
        .resolve(&specs(&["demo-package"]), &options)
        .unwrap();

    assert_eq!(resolution.attempts, 1);
    assert_eq!(resolution.converted.len(), 1);
}

#[test]
fn test_second_run_reuses_repository() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    let wheels = temp.path().join("wheels");
    write_wheel(&wheels, "demo-package", "0.1.0", &[], &[]);

    let first = RepoSolver::new(&repo, UPSTREAM);
    engine(&repo, &first, &wheels)
        .resolve(&specs(&["demo-package"]), &ResolveOptions::default())
        .unwrap();

    let second = RepoSolver::new(&repo, UPSTREAM);
    let resolution = engine(&repo, &second, &wheels)
        .resolve(&specs(&["demo-package"]), &ResolveOptions::default())
        .unwrap();
    assert_eq!(resolution.attempts, 1);
    assert!(resolution.converted.is_empty());
}

#[test]
fn test_unindexed_archive_is_skipped_not_rebuilt() {
    let temp = TempDir::new().unwrap();
    let repo_dir = temp.path().join("repo");
    let wheels = temp.path().join("wheels");
    let wheel = write_wheel(&wheels, "demo-package", "0.1.0", &[], &[]);

    // Index first, then drop an archive in behind its back
    let repo = Repository::new(&repo_dir);
    repo.rebuild_index().unwrap();
    let artifact = graft::Artifact::from_wheel(&wheel).unwrap();
    package_builder()
        .build(
            &artifact,
            &temp.path().join("prebuilt"),
            &repo_dir,
            &graft::BuildOptions::default(),
        )
        .unwrap();

    let solver = RepoSolver::new(&repo_dir, UPSTREAM);
    let resolution = engine(&repo_dir, &solver, &wheels)
        .resolve(&specs(&["demo-package"]), &ResolveOptions::default())
        .unwrap();

    assert_eq!(resolution.attempts, 2);
    assert!(resolution.converted.is_empty());
    assert!(resolution.additions.iter().any(|p| p.name == "demo-package"));
}
