// src/tags.rs

//! Wheel filenames and platform compatibility tags
//!
//! A wheel filename is `{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`
//! where each of the last three fields may hold several `.`-separated tags.
//! [`TargetEnvironment`] produces the ordered list of tags a CPython
//! interpreter on a given conda subdir accepts; a lower index is a better match.

use crate::error::{Error, Result};
use crate::mapping::canonicalize_name;
use crate::requirement::MarkerEnvironment;
use crate::version::Version;
use std::collections::HashMap;
use std::fmt;

/// Highest glibc minor version assumed for manylinux tags
const MAX_GLIBC_MINOR: u32 = 28;

/// Highest macOS major version assumed for macosx tags
const MAX_MACOS_MAJOR: u32 = 14;

/// Oldest Python 3 minor version that supports the stable ABI
const ABI3_MIN_MINOR: u64 = 2;

/// One `interpreter-abi-platform` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub interpreter: String,
    pub abi: String,
    pub platform: String,
}

impl Tag {
    pub fn new(interpreter: &str, abi: &str, platform: &str) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            abi: abi.to_string(),
            platform: platform.to_string(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.interpreter, self.abi, self.platform)
    }
}

/// Parsed `.whl` filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    /// Canonical project name
    pub name: String,
    pub version: String,
    pub build: Option<String>,
    pub python_tags: Vec<String>,
    pub abi_tags: Vec<String>,
    pub platform_tags: Vec<String>,
}

impl WheelFilename {
    pub fn parse(filename: &str) -> Result<Self> {
        let stem = filename
            .strip_suffix(".whl")
            .ok_or_else(|| Error::Metadata(format!("not a wheel filename: {filename}")))?;
        let parts: Vec<&str> = stem.split('-').collect();

        let (name, version, build, python, abi, platform) = match parts.as_slice() {
            [n, v, py, abi, plat] => (*n, *v, None, *py, *abi, *plat),
            [n, v, b, py, abi, plat] => (*n, *v, Some(b.to_string()), *py, *abi, *plat),
            _ => {
                return Err(Error::Metadata(format!(
                    "wheel filename has {} fields, expected 5 or 6: {filename}",
                    parts.len()
                )));
            }
        };

        let split = |s: &str| s.split('.').map(str::to_string).collect::<Vec<_>>();
        Ok(Self {
            name: canonicalize_name(name),
            version: version.to_string(),
            build,
            python_tags: split(python),
            abi_tags: split(abi),
            platform_tags: split(platform),
        })
    }

    /// Expanded tag set
    pub fn tags(&self) -> Vec<Tag> {
        let mut tags = Vec::new();
        for py in &self.python_tags {
            for abi in &self.abi_tags {
                for plat in &self.platform_tags {
                    tags.push(Tag::new(py, abi, plat));
                }
            }
        }
        tags
    }

    /// Installable on any platform (no compiled code)
    pub fn is_pure(&self) -> bool {
        self.platform_tags.iter().all(|p| p == "any") && self.abi_tags.iter().all(|a| a == "none")
    }
}

/// The interpreter and platform artifacts are selected for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEnvironment {
    pub python_major: u64,
    pub python_minor: u64,
    /// Conda subdir, e.g. `linux-64`
    pub subdir: String,
}

impl TargetEnvironment {
    pub fn new(python: &str, subdir: &str) -> Result<Self> {
        let version = Version::parse(python)
            .map_err(|e| Error::Config(format!("invalid python version: {e}")))?;
        let (python_major, python_minor) = version.major_minor();
        if python_major != 3 {
            return Err(Error::Config(format!("unsupported python version: {python}")));
        }
        Ok(Self {
            python_major,
            python_minor,
            subdir: subdir.to_string(),
        })
    }

    /// Conda subdir of the machine we are running on
    pub fn host_subdir() -> String {
        let os = match std::env::consts::OS {
            "macos" => "osx",
            "windows" => "win",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "64",
            "x86" => "32",
            "aarch64" if os == "osx" => "arm64",
            "aarch64" if os == "win" => "arm64",
            other => other,
        };
        format!("{os}-{arch}")
    }

    pub fn python_version(&self) -> Version {
        Version {
            epoch: 0,
            release: vec![self.python_major, self.python_minor],
            pre: None,
            post: None,
            dev: None,
            local: Vec::new(),
        }
    }

    /// `major.minor`
    pub fn python_short(&self) -> String {
        format!("{}.{}", self.python_major, self.python_minor)
    }

    pub fn is_windows(&self) -> bool {
        self.subdir.starts_with("win-")
    }

    pub fn marker_environment(&self) -> MarkerEnvironment {
        MarkerEnvironment::cpython(&self.python_short(), &self.subdir)
    }

    /// Platform tags for the subdir, most specific first
    pub fn platform_tags(&self) -> Vec<String> {
        let (os, arch) = self.subdir.split_once('-').unwrap_or((self.subdir.as_str(), ""));
        match (os, arch) {
            ("linux", arch) => {
                let machine = match arch {
                    "64" => "x86_64",
                    "32" => "i686",
                    other => other,
                };
                let mut tags = Vec::new();
                for minor in (5..=MAX_GLIBC_MINOR).rev() {
                    tags.push(format!("manylinux_2_{minor}_{machine}"));
                    let legacy = match minor {
                        17 => Some("manylinux2014"),
                        12 => Some("manylinux2010"),
                        5 => Some("manylinux1"),
                        _ => None,
                    };
                    if let Some(legacy) = legacy {
                        tags.push(format!("{legacy}_{machine}"));
                    }
                }
                tags.push(format!("linux_{machine}"));
                tags
            }
            ("osx", arch) => {
                let arches: &[&str] = if arch == "arm64" {
                    &["arm64", "universal2"]
                } else {
                    &["x86_64", "intel", "fat64", "fat32", "universal2", "universal"]
                };
                let mut versions: Vec<(u32, u32)> =
                    (11..=MAX_MACOS_MAJOR).rev().map(|major| (major, 0)).collect();
                if arch != "arm64" {
                    versions.extend((4..=16).rev().map(|minor| (10, minor)));
                }
                let mut tags = Vec::new();
                for (major, minor) in versions {
                    for a in arches {
                        tags.push(format!("macosx_{major}_{minor}_{a}"));
                    }
                }
                tags
            }
            ("win", "64") => vec!["win_amd64".to_string()],
            ("win", "32") => vec!["win32".to_string()],
            ("win", "arm64") => vec!["win_arm64".to_string()],
            _ => Vec::new(),
        }
    }

    /// Every accepted tag in priority order (CPython tags, then generic ones)
    pub fn supported_tags(&self) -> Vec<Tag> {
        let (major, minor) = (self.python_major, self.python_minor);
        let cp = format!("cp{major}{minor}");
        let platforms = self.platform_tags();
        let mut tags = Vec::new();

        for plat in &platforms {
            tags.push(Tag::new(&cp, &cp, plat));
        }
        for plat in &platforms {
            tags.push(Tag::new(&cp, "abi3", plat));
        }
        for plat in &platforms {
            tags.push(Tag::new(&cp, "none", plat));
        }
        for older in (ABI3_MIN_MINOR..minor).rev() {
            for plat in &platforms {
                tags.push(Tag::new(&format!("cp{major}{older}"), "abi3", plat));
            }
        }

        let py_versions: Vec<String> = std::iter::once(format!("py{major}{minor}"))
            .chain(std::iter::once(format!("py{major}")))
            .chain((0..minor).rev().map(|m| format!("py{major}{m}")))
            .collect();

        for py in &py_versions {
            for plat in &platforms {
                tags.push(Tag::new(py, "none", plat));
            }
        }

        tags.push(Tag::new(&cp, "none", "any"));
        for py in &py_versions {
            tags.push(Tag::new(py, "none", "any"));
        }
        tags
    }

    /// Priority lookup table built from [`supported_tags`](Self::supported_tags)
    pub fn tag_priorities(&self) -> HashMap<Tag, usize> {
        self.supported_tags()
            .into_iter()
            .enumerate()
            .map(|(idx, tag)| (tag, idx))
            .collect()
    }

    /// Best (lowest) priority among a wheel's tags, or `None` if incompatible
    pub fn rank(&self, wheel: &WheelFilename, priorities: &HashMap<Tag, usize>) -> Option<usize> {
        wheel
            .tags()
            .iter()
            .filter_map(|tag| priorities.get(tag).copied())
            .min()
    }
}
