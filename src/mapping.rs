// src/mapping.rs

//! Package name aliasing between PyPI and conda
//!
//! The alias table uses the grayskull format: keys are canonical PyPI names,
//! values carry the conda name, the import name and where the mapping came
//! from. Unmapped names pass through unchanged (after canonicalization).
//!
//! The table is many-to-one (`opencv-python` and `opencv-python-headless`
//! both become `opencv`), so the reverse direction cannot be a true inverse.
//! It is built lazily on first use by walking the table in key order and
//! keeping the first PyPI name seen for each conda name. The result is
//! deterministic but approximate.
//!
//! The table compiled into the crate is a small seed covering the aliases
//! that matter most often (`torch`/`pytorch`, `opencv-python`/`opencv`, ...).
//! Point the `mapping_file` configuration key at a full grayskull
//! `pypi_map.json` to get complete coverage; a loaded file replaces the seed.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{LazyLock, OnceLock};
use tracing::debug;

static SEPARATOR_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("separator pattern is valid"));

/// Seed alias table shipped with the crate
const EMBEDDED_MAPPING: &str = include_str!("../data/name_mapping.json");

/// Normalize a PyPI project name: lowercase, runs of `-`, `_`, `.` collapsed to `-`
pub fn canonicalize_name(name: &str) -> String {
    SEPARATOR_RUN
        .replace_all(name.trim(), "-")
        .to_lowercase()
}

/// One row of the alias table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub pypi_name: String,
    pub conda_name: String,
    #[serde(default)]
    pub import_name: Option<String>,
    #[serde(default)]
    pub mapping_source: Option<String>,
}

impl MappingEntry {
    /// Identity entry for a name the table does not know
    fn passthrough(name: &str) -> Self {
        Self {
            pypi_name: name.to_string(),
            conda_name: name.to_string(),
            import_name: None,
            mapping_source: None,
        }
    }
}

/// Counts over the alias table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingStats {
    pub total: usize,
    pub by_source: BTreeMap<String, usize>,
}

/// PyPI <-> conda name translation, constructed once and shared by reference
#[derive(Debug, Default)]
pub struct NameMapping {
    entries: BTreeMap<String, MappingEntry>,
    reverse: OnceLock<HashMap<String, String>>,
}

impl NameMapping {
    /// A mapping with no aliases: every name passes through
    pub fn empty() -> Self {
        Self::default()
    }

    /// The seed alias table compiled into the binary
    ///
    /// It only lists well-known aliases. A full grayskull table has to be
    /// loaded with [`NameMapping::load`] or [`NameMapping::from_file`].
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_MAPPING)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, MappingEntry> = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid name mapping: {e}")))?;
        let entries = raw
            .into_iter()
            .map(|(key, entry)| (canonicalize_name(&key), entry))
            .collect();
        Ok(Self {
            entries,
            reverse: OnceLock::new(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read name mapping {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Load from `path` when given, otherwise the embedded table
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::embedded(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Conda name for a PyPI project name
    pub fn to_conda(&self, pypi_name: &str) -> String {
        self.to_conda_with(pypi_name, false)
    }

    /// Conda name for a PyPI project name, optionally bypassing the table.
    ///
    /// Explicitly requested packages skip the table so that a user asking for
    /// the PyPI project gets exactly that project, not its conda counterpart.
    pub fn to_conda_with(&self, pypi_name: &str, skip_mapping: bool) -> String {
        let name = canonicalize_name(pypi_name);
        if skip_mapping {
            return name;
        }
        match self.entries.get(&name) {
            Some(entry) => entry.conda_name.clone(),
            None => name,
        }
    }

    /// Best-effort PyPI name for a conda package name
    pub fn to_pypi(&self, conda_name: &str) -> String {
        let reverse = self.reverse.get_or_init(|| self.build_reverse());
        match reverse.get(conda_name) {
            Some(pypi) => canonicalize_name(pypi),
            None => canonicalize_name(conda_name),
        }
    }

    fn build_reverse(&self) -> HashMap<String, String> {
        let mut reverse = HashMap::with_capacity(self.entries.len());
        for entry in self.entries.values() {
            reverse
                .entry(entry.conda_name.clone())
                .or_insert_with(|| entry.pypi_name.clone());
        }
        debug!("Built reverse name mapping with {} entries", reverse.len());
        reverse
    }

    pub fn has_mapping(&self, pypi_name: &str) -> bool {
        self.entries.contains_key(&canonicalize_name(pypi_name))
    }

    /// Full alias row, or a passthrough row for unknown names
    pub fn info(&self, pypi_name: &str) -> MappingEntry {
        let name = canonicalize_name(pypi_name);
        self.entries
            .get(&name)
            .cloned()
            .unwrap_or_else(|| MappingEntry::passthrough(&name))
    }

    pub fn stats(&self) -> MappingStats {
        let mut by_source = BTreeMap::new();
        for entry in self.entries.values() {
            let source = entry
                .mapping_source
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *by_source.entry(source).or_insert(0) += 1;
        }
        MappingStats {
            total: self.entries.len(),
            by_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_name() {
        assert_eq!(canonicalize_name("Zope.Interface"), "zope-interface");
        assert_eq!(canonicalize_name("typing__extensions"), "typing-extensions");
        assert_eq!(canonicalize_name("demo-package"), "demo-package");
        assert_eq!(canonicalize_name("a-_.b"), "a-b");
    }

    #[test]
    fn test_forward_lookup() {
        let mapping = NameMapping::embedded().unwrap();
        assert_eq!(mapping.to_conda("zope.interface"), "zope.interface");
        assert_eq!(mapping.to_conda("Zope-Interface"), "zope.interface");
        assert_eq!(mapping.to_conda("torch"), "pytorch");
        assert_eq!(mapping.to_conda("Unknown_Package"), "unknown-package");
    }

    #[test]
    fn test_skip_mapping() {
        let mapping = NameMapping::embedded().unwrap();
        assert_eq!(mapping.to_conda_with("torch", true), "torch");
    }

    #[test]
    fn test_reverse_lookup_first_writer_wins() {
        let mapping = NameMapping::embedded().unwrap();
        assert_eq!(mapping.to_pypi("zope.interface"), "zope-interface");
        assert_eq!(mapping.to_pypi("pytorch"), "torch");
        // Two PyPI projects map to `opencv`; the first key in order is kept
        assert_eq!(mapping.to_pypi("opencv"), "opencv-python");
        assert_eq!(mapping.to_pypi("psycopg2"), "psycopg2");
        assert_eq!(mapping.to_pypi("not-in-table"), "not-in-table");
    }

    #[test]
    fn test_info_and_stats() {
        let mapping = NameMapping::embedded().unwrap();
        assert!(mapping.has_mapping("PyYAML"));
        assert!(!mapping.has_mapping("demo-package"));

        let info = mapping.info("pyyaml");
        assert_eq!(info.import_name.as_deref(), Some("yaml"));

        let unknown = mapping.info("demo_package");
        assert_eq!(unknown.conda_name, "demo-package");
        assert_eq!(unknown.mapping_source, None);

        let stats = mapping.stats();
        assert_eq!(stats.total, mapping.len());
        assert!(stats.by_source.contains_key("regro-bot"));
    }

    #[test]
    fn test_from_json_canonicalizes_keys() {
        let mapping = NameMapping::from_json(
            r#"{"Foo_Bar": {"pypi_name": "foo-bar", "conda_name": "foobar"}}"#,
        )
        .unwrap();
        assert_eq!(mapping.to_conda("foo.bar"), "foobar");
        assert!(NameMapping::from_json("not json").is_err());
        assert!(NameMapping::empty().is_empty());
    }

    #[test]
    fn test_loaded_file_replaces_seed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pypi_map.json");
        std::fs::write(
            &path,
            r#"{"ruamel.yaml": {"pypi_name": "ruamel.yaml", "conda_name": "ruamel.yaml",
                "import_name": "ruamel", "mapping_source": "regro-bot"}}"#,
        )
        .unwrap();

        let seed = NameMapping::load(None).unwrap();
        assert!(seed.has_mapping("torch"));

        let full = NameMapping::load(Some(&path)).unwrap();
        assert!(full.has_mapping("ruamel-yaml"));
        assert!(!full.has_mapping("torch"));
        assert_eq!(full.to_conda("torch"), "torch");
    }
}
