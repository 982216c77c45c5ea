// src/metadata.rs

//! Wheel `.dist-info` metadata
//!
//! Reads the three files the converter cares about:
//! - `METADATA`: RFC 822 style headers (name, version, license,
//!   `Requires-Dist`, `Requires-Python`) followed by the long description
//! - `entry_points.txt`: `console_scripts` and `gui_scripts` sections
//! - the location of the single `*.dist-info` directory itself

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parsed core metadata of an installed distribution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistMetadata {
    pub name: String,
    pub version: String,
    pub summary: Option<String>,
    pub license: Option<String>,
    pub license_expression: Option<String>,
    pub license_files: Vec<String>,
    pub home_page: Option<String>,
    pub project_urls: Vec<(String, String)>,
    pub requires_python: Option<String>,
    pub requires_dist: Vec<String>,
    pub provides_extra: Vec<String>,
    pub description: Option<String>,
}

impl DistMetadata {
    pub fn parse(text: &str) -> Result<Self> {
        let mut meta = DistMetadata::default();
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut lines = text.lines();

        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = headers.last_mut() {
                    value.push('\n');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_lowercase(), value.trim().to_string()));
            }
        }

        let body: Vec<&str> = lines.collect();
        let body = body.join("\n");

        for (key, value) in headers {
            match key.as_str() {
                "name" => meta.name = value,
                "version" => meta.version = value,
                "summary" => meta.summary = Some(value),
                "license" => meta.license = Some(value),
                "license-expression" => meta.license_expression = Some(value),
                "license-file" => meta.license_files.push(value),
                "home-page" => meta.home_page = Some(value),
                "project-url" => {
                    if let Some((label, url)) = value.split_once(',') {
                        meta.project_urls
                            .push((label.trim().to_string(), url.trim().to_string()));
                    }
                }
                "requires-python" => meta.requires_python = Some(value),
                "requires-dist" => meta.requires_dist.push(value),
                "provides-extra" => meta.provides_extra.push(value),
                "description" => meta.description = Some(value),
                _ => {}
            }
        }

        if meta.description.is_none() && !body.trim().is_empty() {
            meta.description = Some(body);
        }

        if meta.name.is_empty() || meta.version.is_empty() {
            return Err(Error::Metadata(
                "METADATA is missing Name or Version".to_string(),
            ));
        }

        Ok(meta)
    }

    /// Read `<dist-info>/METADATA`
    pub fn from_dist_info(dist_info: &Path) -> Result<Self> {
        let path = dist_info.join("METADATA");
        let text = fs::read_to_string(&path).map_err(|e| {
            Error::Metadata(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// License text for the package record: the SPDX expression if declared,
    /// else the free-form `License` header
    pub fn license_text(&self) -> Option<&str> {
        self.license_expression
            .as_deref()
            .or(self.license.as_deref())
            .filter(|l| !l.is_empty())
    }

    /// Project homepage from `Home-page` or a `Project-URL: Homepage, ...`
    pub fn homepage(&self) -> Option<&str> {
        self.home_page.as_deref().filter(|h| !h.is_empty()).or_else(|| {
            self.project_urls
                .iter()
                .find(|(label, _)| label.eq_ignore_ascii_case("homepage"))
                .map(|(_, url)| url.as_str())
        })
    }
}

/// Console or GUI launcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    Console,
    Gui,
}

/// `name = module:attr` from `entry_points.txt`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryPoint {
    pub name: String,
    pub value: String,
    pub kind: ScriptKind,
}

impl EntryPoint {
    /// The `name = value` form used in `link.json`
    pub fn as_link_entry(&self) -> String {
        format!("{} = {}", self.name, self.value)
    }
}

/// Parse the script sections of `entry_points.txt`; other groups are ignored
pub fn parse_entry_points(text: &str) -> Vec<EntryPoint> {
    let mut entries = Vec::new();
    let mut section: Option<ScriptKind> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(['#', ';']) {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = match name.trim() {
                "console_scripts" => Some(ScriptKind::Console),
                "gui_scripts" => Some(ScriptKind::Gui),
                _ => None,
            };
            continue;
        }
        let Some(kind) = section else { continue };
        if let Some((name, value)) = line.split_once('=') {
            entries.push(EntryPoint {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
                kind,
            });
        }
    }

    entries
}

/// Read `<dist-info>/entry_points.txt` if present
pub fn read_entry_points(dist_info: &Path) -> Result<Vec<EntryPoint>> {
    let path = dist_info.join("entry_points.txt");
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(parse_entry_points(&fs::read_to_string(path)?))
}

/// Find the one `*.dist-info` directory directly under `site_packages`
pub fn find_dist_info(site_packages: &Path) -> Result<PathBuf> {
    let mut found = Vec::new();
    for entry in fs::read_dir(site_packages)? {
        let entry = entry?;
        let name = entry.file_name();
        if entry.file_type()?.is_dir() && name.to_string_lossy().ends_with(".dist-info") {
            found.push(entry.path());
        }
    }
    found.sort();

    match found.len() {
        0 => Err(Error::Metadata(format!(
            "no .dist-info directory under {}",
            site_packages.display()
        ))),
        1 => Ok(found.remove(0)),
        n => {
            debug!("Found {} dist-info directories, using {}", n, found[0].display());
            Ok(found.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "Metadata-Version: 2.1
Name: demo-package
Version: 0.1.0
Summary: A demo
License: MIT
Project-URL: Homepage, https://example.com/demo
Requires-Python: >=3.8
Requires-Dist: requests>=2
Requires-Dist: pytest; extra == 'test'
Provides-Extra: test
Classifier: Programming Language :: Python
 continued

Long description
second line
";

    #[test]
    fn test_parse_metadata() {
        let meta = DistMetadata::parse(SAMPLE).unwrap();
        assert_eq!(meta.name, "demo-package");
        assert_eq!(meta.version, "0.1.0");
        assert_eq!(meta.requires_python.as_deref(), Some(">=3.8"));
        assert_eq!(meta.requires_dist, vec!["requests>=2", "pytest; extra == 'test'"]);
        assert_eq!(meta.provides_extra, vec!["test"]);
        assert_eq!(meta.license_text(), Some("MIT"));
        assert_eq!(meta.homepage(), Some("https://example.com/demo"));
        assert_eq!(meta.description.as_deref(), Some("Long description\nsecond line"));
    }

    #[test]
    fn test_parse_metadata_requires_name() {
        assert!(DistMetadata::parse("Version: 1.0\n").is_err());
    }

    #[test]
    fn test_parse_entry_points() {
        let text = "[console_scripts]\ndemo = demo.cli:main\n\n[gui_scripts]\ndemo-gui = demo.gui:run\n\n[pytest11]\nplugin = demo.plugin\n";
        let entries = parse_entry_points(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].as_link_entry(), "demo = demo.cli:main");
        assert_eq!(entries[0].kind, ScriptKind::Console);
        assert_eq!(entries[1].kind, ScriptKind::Gui);
    }

    #[test]
    fn test_find_dist_info() {
        let dir = TempDir::new().unwrap();
        assert!(find_dist_info(dir.path()).is_err());

        fs::create_dir(dir.path().join("demo_package-0.1.0.dist-info")).unwrap();
        fs::create_dir(dir.path().join("demo_package")).unwrap();
        let found = find_dist_info(dir.path()).unwrap();
        assert!(found.ends_with("demo_package-0.1.0.dist-info"));
        assert!(read_entry_points(&found).unwrap().is_empty());
    }
}
