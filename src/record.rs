// src/record.rs

//! Conda package metadata: `info/index.json`, `about.json`, `link.json`
//!
//! The build string is derived from the record's content so that a change
//! in dependencies, extras, entry points or build mode produces a new stem
//! instead of silently replacing an existing archive.

use crate::error::Result;
use crate::hash::sha256;
use crate::metadata::{DistMetadata, EntryPoint};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Platform bucket for interpreter-portable packages
pub const NOARCH_SUBDIR: &str = "noarch";

/// Prefix of every generated build string
pub const BUILD_PREFIX: &str = "pypi";

/// Contents of `info/index.json`
///
/// Fields are declared in key order so the serialized JSON is sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub build: String,
    pub build_number: u64,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub license_family: String,
    pub name: String,
    /// `python` for noarch packages, absent for platform builds
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub noarch: String,
    pub subdir: String,
    #[serde(default)]
    pub timestamp: u64,
    pub version: String,
}

impl PackageRecord {
    /// `name-version-build`, the archive's file stem
    pub fn stem(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build)
    }

    pub fn to_index_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builds a [`PackageRecord`] from translated metadata
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    name: String,
    version: String,
    depends: Vec<String>,
    extras: BTreeMap<String, Vec<String>>,
    license: String,
    entry_points: Vec<String>,
    build_number: u64,
    timestamp: Option<u64>,
    subdir: String,
    /// `file://` URL of the checkout an editable build points at
    editable: Option<String>,
}

impl RecordBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            depends: Vec::new(),
            extras: BTreeMap::new(),
            license: String::new(),
            entry_points: Vec::new(),
            build_number: 0,
            timestamp: None,
            subdir: NOARCH_SUBDIR.to_string(),
            editable: None,
        }
    }

    pub fn depends(mut self, depends: Vec<String>) -> Self {
        self.depends = depends;
        self
    }

    pub fn extras(mut self, extras: BTreeMap<String, Vec<String>>) -> Self {
        self.extras = extras;
        self
    }

    pub fn license(mut self, license: impl Into<String>) -> Self {
        self.license = license.into();
        self
    }

    pub fn entry_points(mut self, entry_points: &[EntryPoint]) -> Self {
        self.entry_points = entry_points.iter().map(EntryPoint::as_link_entry).collect();
        self
    }

    pub fn build_number(mut self, build_number: u64) -> Self {
        self.build_number = build_number;
        self
    }

    /// Pin the timestamp (milliseconds since the epoch)
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Platform bucket; anything other than `noarch` is a platform build
    pub fn subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = subdir.into();
        self
    }

    /// Mark the record as an editable build of the project at `url`
    pub fn editable(mut self, url: impl Into<String>) -> Self {
        self.editable = Some(url.into());
        self
    }

    pub fn is_noarch(&self) -> bool {
        self.subdir == NOARCH_SUBDIR
    }

    /// `pypi_<8 hex digits>_<build number>`
    pub fn build_string(&self) -> String {
        let mut fingerprint = json!({
            "name": self.name,
            "version": self.version,
            "depends": self.depends,
            "extras": self.extras,
            "entry_points": self.entry_points,
            "subdir": self.subdir,
        });
        // Only editable builds carry the project URL
        if let Some(url) = &self.editable {
            fingerprint["editable"] = json!(url);
        }
        let digest = sha256(fingerprint.to_string().as_bytes());
        format!("{}_{}_{}", BUILD_PREFIX, &digest[..8], self.build_number)
    }

    pub fn build(self) -> PackageRecord {
        let build = self.build_string();
        let noarch = if self.is_noarch() { "python" } else { "" };
        PackageRecord {
            build,
            build_number: self.build_number,
            depends: self.depends,
            extras: self.extras,
            license: self.license,
            license_family: String::new(),
            name: self.name,
            noarch: noarch.to_string(),
            subdir: self.subdir,
            timestamp: self.timestamp.unwrap_or_else(timestamp_ms),
            version: self.version,
        }
    }
}

/// Record timestamp in milliseconds; `SOURCE_DATE_EPOCH` (seconds) wins when set
pub fn timestamp_ms() -> u64 {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| epoch_ms(&s))
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().max(0) as u64)
}

fn epoch_ms(secs: &str) -> Option<u64> {
    secs.trim().parse::<u64>().ok().map(|secs| secs.saturating_mul(1000))
}

/// Contents of `info/about.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct About {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub home: String,
    #[serde(default)]
    pub license: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub license_file: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl About {
    pub fn from_metadata(meta: &DistMetadata) -> Self {
        Self {
            description: meta.description.clone().unwrap_or_default(),
            home: meta.homepage().unwrap_or_default().to_string(),
            license: meta.license_text().unwrap_or_default().to_string(),
            license_file: meta.license_files.clone(),
            summary: meta.summary.clone().unwrap_or_default(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `noarch` section of `info/link.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoarchLink {
    pub entry_points: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Contents of `info/link.json`; only written when the package has scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkJson {
    pub noarch: NoarchLink,
    pub package_metadata_version: u32,
}

impl LinkJson {
    pub fn for_entry_points(entry_points: &[EntryPoint]) -> Option<Self> {
        if entry_points.is_empty() {
            return None;
        }
        Some(Self {
            noarch: NoarchLink {
                entry_points: entry_points.iter().map(EntryPoint::as_link_entry).collect(),
                kind: "python".to_string(),
            },
            package_metadata_version: 1,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
