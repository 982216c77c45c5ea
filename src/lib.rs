// src/lib.rs

//! graft: conda environments that reach into PyPI
//!
//! When a conda solve fails because packages only exist on PyPI, graft
//! fetches wheels for them, converts each into a `.conda` package in a local
//! channel, reindexes that channel and solves again, until the request is
//! satisfiable or provably is not.
//!
//! # Architecture
//!
//! - [`engine`]: the convergence loop (solve, fetch, convert, reindex, retry)
//! - [`builder`]: wheel to `.conda` conversion, normal and editable
//! - [`translate`]: PEP 508 requirements to conda MatchSpecs, extras kept apart
//! - [`manifest`]: per-file hashes (`paths.json`) and wheel `RECORD` upkeep
//! - [`index`]: the local channel and its `repodata.json`
//! - [`solver`], [`fetch`], [`install`]: the external collaborators
//! - [`project`]: wheels built from a local checkout by its Python backend

pub mod archive;
pub mod builder;
pub mod config;
pub mod diagnostics;
pub mod engine;
mod error;
pub mod fetch;
pub mod hash;
pub mod index;
pub mod install;
pub mod manifest;
pub mod mapping;
pub mod metadata;
pub mod project;
pub mod record;
pub mod requirement;
pub mod solver;
pub mod spec;
pub mod tags;
pub mod translate;
pub mod version;

pub use builder::{BuildMode, BuildOptions, BuiltPackage, PackageBuilder};
pub use engine::{ConvergenceEngine, Resolution, ResolveOptions};
pub use error::{Error, Result};
pub use fetch::{Artifact, Fetcher};
pub use hash::{Hash, HashAlgorithm, Hasher};
pub use index::Repository;
pub use manifest::{BuildManifest, PathEntry, PathType};
pub use mapping::NameMapping;
pub use project::{Distribution, ProjectBuilder};
pub use record::PackageRecord;
pub use solver::{Diff, SolveError, SolveRequest, Solver};
pub use spec::PackageSpec;
pub use translate::{Translation, Translator};
