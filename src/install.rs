// src/install.rs

//! Wheel unpacking into conda package layouts
//!
//! Install schemes map onto the directories conda expects. For a
//! `noarch: python` package:
//!
//! | wheel scheme          | package path      |
//! |-----------------------|-------------------|
//! | `purelib`, `platlib`  | `site-packages/`  |
//! | `scripts`             | `python-scripts/` |
//! | `headers`             | `include/`        |
//! | `data`                | package root      |
//!
//! Platform packages use the interpreter's real prefix layout instead
//! (`lib/pythonX.Y/site-packages`, `bin`, or `Lib/site-packages`, `Scripts`
//! on Windows).
//!
//! The dist-info `RECORD` is rewritten so moved `.data` files point at their
//! new location relative to `site-packages`.

use crate::error::{Error, Result};
use crate::fetch::Artifact;
use crate::manifest::RecordFile;
use crate::tags::TargetEnvironment;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

pub const SITE_PACKAGES: &str = "site-packages";
pub const PYTHON_SCRIPTS: &str = "python-scripts";
pub const INCLUDE: &str = "include";

/// Wheel install scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Purelib,
    Platlib,
    Scripts,
    Headers,
    Data,
}

impl Scheme {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "purelib" => Some(Self::Purelib),
            "platlib" => Some(Self::Platlib),
            "scripts" => Some(Self::Scripts),
            "headers" => Some(Self::Headers),
            "data" => Some(Self::Data),
            _ => None,
        }
    }
}

/// Where each scheme lands inside the package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub site_packages: String,
    pub scripts: String,
    pub headers: String,
}

impl Layout {
    pub fn noarch() -> Self {
        Self {
            site_packages: SITE_PACKAGES.to_string(),
            scripts: PYTHON_SCRIPTS.to_string(),
            headers: INCLUDE.to_string(),
        }
    }

    /// Prefix layout of a CPython interpreter on the target platform
    pub fn for_target(target: &TargetEnvironment) -> Self {
        if target.is_windows() {
            Self {
                site_packages: "Lib/site-packages".to_string(),
                scripts: "Scripts".to_string(),
                headers: "include".to_string(),
            }
        } else {
            Self {
                site_packages: format!("lib/python{}/site-packages", target.python_short()),
                scripts: "bin".to_string(),
                headers: INCLUDE.to_string(),
            }
        }
    }

    /// Directory under the package root `scheme` installs into
    pub fn dir(&self, scheme: Scheme) -> &str {
        match scheme {
            Scheme::Purelib | Scheme::Platlib => &self.site_packages,
            Scheme::Scripts => &self.scripts,
            Scheme::Headers => &self.headers,
            Scheme::Data => "",
        }
    }
}

/// Result of unpacking an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTree {
    pub root: PathBuf,
    pub site_packages: PathBuf,
    pub dist_info: PathBuf,
    /// Installed files relative to `root`, tagged by scheme
    pub files: Vec<(Scheme, PathBuf)>,
}

/// Materializes an artifact's files into a directory tree
pub trait Installer {
    fn unpack(&self, artifact: &Artifact, dest: &Path, layout: &Layout) -> Result<InstalledTree>;
}

/// Unpacks `.whl` files directly with the `zip` crate
#[derive(Debug, Clone, Default)]
pub struct WheelInstaller;

impl WheelInstaller {
    pub fn new() -> Self {
        Self
    }
}

/// Reject absolute paths and `..` components
fn safe_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// `#!python` placeholders become a portable interpreter lookup
fn rewrite_shebang(data: Vec<u8>) -> Vec<u8> {
    let first_line_end = data.iter().position(|&b| b == b'\n').unwrap_or(data.len());
    let first = &data[..first_line_end];
    let replacement: &[u8] = if first == b"#!python" || first == b"#!python\r" {
        b"#!/usr/bin/env python"
    } else if first == b"#!pythonw" || first == b"#!pythonw\r" {
        b"#!/usr/bin/env pythonw"
    } else {
        return data;
    };
    let mut out = replacement.to_vec();
    out.extend_from_slice(&data[first_line_end..]);
    out
}

impl Installer for WheelInstaller {
    fn unpack(&self, artifact: &Artifact, dest: &Path, layout: &Layout) -> Result<InstalledTree> {
        info!("Unpacking {} into {}", artifact.path.display(), dest.display());
        fs::create_dir_all(dest)?;
        let site_packages = dest.join(&layout.site_packages);
        fs::create_dir_all(&site_packages)?;

        let mut zip = ZipArchive::new(File::open(&artifact.path)?)?;

        let dist_info_name = zip
            .file_names()
            .filter_map(|name| name.split('/').next())
            .find(|top| top.ends_with(".dist-info"))
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Build(format!("{} has no .dist-info directory", artifact.path.display()))
            })?;
        let data_prefix = format!("{}.data", dist_info_name.trim_end_matches(".dist-info"));

        let mut files = Vec::new();
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry
                .enclosed_name()
                .filter(|p| safe_relative(p))
                .ok_or_else(|| {
                    Error::Build(format!("unsafe path '{}' in wheel", entry.name()))
                })?;

            let (scheme, rel) = match name.strip_prefix(&data_prefix) {
                Ok(inside) => {
                    let mut parts = inside.components();
                    let scheme_name = parts
                        .next()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let scheme = Scheme::parse(&scheme_name).ok_or_else(|| {
                        Error::Build(format!("unknown wheel scheme '{scheme_name}'"))
                    })?;
                    (scheme, Path::new(layout.dir(scheme)).join(parts.as_path()))
                }
                Err(_) => (Scheme::Purelib, Path::new(&layout.site_packages).join(&name)),
            };

            let target = dest.join(&rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            if scheme == Scheme::Scripts {
                data = rewrite_shebang(data);
            }
            let mut out = File::create(&target)?;
            out.write_all(&data)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let declared = entry.unix_mode().unwrap_or(0o644);
                let executable = declared & 0o111 != 0 || scheme == Scheme::Scripts;
                let mode = if executable { 0o755 } else { 0o644 };
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
            }

            debug!("Installed {:?} file {}", scheme, rel.display());
            files.push((scheme, rel));
        }

        let dist_info = site_packages.join(&dist_info_name);
        relocate_record(&dist_info, &data_prefix, layout)?;

        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(InstalledTree {
            root: dest.to_path_buf(),
            site_packages,
            dist_info,
            files,
        })
    }
}

/// Point RECORD rows for `.data` files at their installed location
fn relocate_record(dist_info: &Path, data_prefix: &str, layout: &Layout) -> Result<()> {
    let path = dist_info.join("RECORD");
    if !path.exists() {
        return Ok(());
    }
    let mut record = RecordFile::read(&path)?;
    let prefix = format!("{data_prefix}/");
    // RECORD paths are relative to site-packages
    let up = Path::new(&layout.site_packages)
        .components()
        .map(|_| "..")
        .collect::<PathBuf>();
    let moved = record.relocate(|row| {
        let inside = row.strip_prefix(&prefix)?;
        let (scheme, rest) = inside.split_once('/')?;
        let dir = layout.dir(Scheme::parse(scheme)?);
        Some(to_slash(&up.join(dir).join(rest)))
    });
    if moved > 0 {
        record.save()?;
    }
    Ok(())
}
