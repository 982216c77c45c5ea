// src/manifest.rs

//! Per-file manifests
//!
//! [`BuildManifest`] is the conda `info/paths.json`: every regular file and
//! symlink under a package root, with its SHA-256 and size, sorted by path.
//! The top-level `info/` directory and any `.git` directory are excluded.
//!
//! [`RecordFile`] is the wheel `RECORD` inside a `.dist-info` directory. The
//! editable build rewrites single rows of it after generating files, without
//! touching the rest.

use crate::error::{Error, Result};
use crate::hash::{EMPTY_SHA256, record_digest, sha256_file};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Reserved metadata directory at the package root
pub const METADATA_DIR: &str = "info";

/// How a path is materialized on install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    HardLink,
    SoftLink,
}

/// One file in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    #[serde(rename = "_path")]
    pub path: String,
    pub path_type: PathType,
    pub sha256: String,
    pub size_in_bytes: u64,
}

/// Contents of `info/paths.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub paths: Vec<PathEntry>,
    pub paths_version: u32,
}

fn is_excluded(root: &Path, path: &Path) -> bool {
    if path.file_name().is_some_and(|name| name == ".git") {
        return true;
    }
    path.strip_prefix(root)
        .is_ok_and(|rel| rel == Path::new(METADATA_DIR))
}

/// Relative path with `/` separators
fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| Error::Build(format!("{} is outside {}", path.display(), root.display())))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

impl BuildManifest {
    /// Walk `root` and describe every file and symlink below it
    pub fn scan(root: &Path) -> Result<Self> {
        let mut paths = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !is_excluded(root, e.path()));

        for entry in walker {
            let entry = entry?;
            let file_type = entry.file_type();
            let path = entry.path();

            if file_type.is_dir() {
                continue;
            }

            let key = relative_key(root, path)?;

            if file_type.is_symlink() {
                match fs::metadata(path) {
                    Ok(target) if target.is_file() => paths.push(PathEntry {
                        path: key,
                        path_type: PathType::SoftLink,
                        sha256: sha256_file(path)?,
                        size_in_bytes: target.len(),
                    }),
                    Ok(_) => paths.push(PathEntry {
                        path: key,
                        path_type: PathType::SoftLink,
                        sha256: EMPTY_SHA256.to_string(),
                        size_in_bytes: 0,
                    }),
                    Err(_) => {
                        // Dangling: an empty regular file as far as the manifest is concerned
                        debug!("Dangling symlink {}", key);
                        paths.push(PathEntry {
                            path: key,
                            path_type: PathType::HardLink,
                            sha256: EMPTY_SHA256.to_string(),
                            size_in_bytes: 0,
                        });
                    }
                }
            } else if file_type.is_file() {
                let size = entry.metadata()?.len();
                paths.push(PathEntry {
                    path: key,
                    path_type: PathType::HardLink,
                    sha256: sha256_file(path)?,
                    size_in_bytes: size,
                });
            } else {
                debug!("Not a regular file, skipping: {}", path.display());
            }
        }

        paths.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(Self {
            paths,
            paths_version: 1,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&PathEntry> {
        self.paths
            .binary_search_by(|entry| entry.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.paths[idx])
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// One `path,hash,size` row of a wheel RECORD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub path: String,
    pub hash: String,
    pub size: String,
}

/// A wheel `RECORD` file held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFile {
    location: PathBuf,
    rows: Vec<RecordRow>,
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl RecordFile {
    pub fn read(location: &Path) -> Result<Self> {
        let text = fs::read_to_string(location)?;
        let rows = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let mut fields = split_csv_line(line).into_iter();
                RecordRow {
                    path: fields.next().unwrap_or_default(),
                    hash: fields.next().unwrap_or_default(),
                    size: fields.next().unwrap_or_default(),
                }
            })
            .collect();
        Ok(Self {
            location: location.to_path_buf(),
            rows,
        })
    }

    pub fn rows(&self) -> &[RecordRow] {
        &self.rows
    }

    pub fn get(&self, path: &str) -> Option<&RecordRow> {
        self.rows.iter().find(|row| row.path == path)
    }

    /// Recompute hash and size for the file at `base/relpath`.
    ///
    /// The row with that path is replaced in place; a file the RECORD did not
    /// list yet is appended before the RECORD's own row.
    pub fn refresh(&mut self, base: &Path, relpath: &str) -> Result<()> {
        let data = fs::read(base.join(relpath))?;
        let row = RecordRow {
            path: relpath.to_string(),
            hash: record_digest(&data),
            size: data.len().to_string(),
        };

        if let Some(existing) = self.rows.iter_mut().find(|r| r.path == relpath) {
            *existing = row;
        } else {
            let own = self.rows.iter().position(|r| r.hash.is_empty() && r.path.ends_with("/RECORD"));
            match own {
                Some(idx) => self.rows.insert(idx, row),
                None => self.rows.push(row),
            }
        }
        Ok(())
    }

    /// Drop every row `f` selects and return them in their original order
    pub fn remove_where(&mut self, mut f: impl FnMut(&RecordRow) -> bool) -> Vec<RecordRow> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.rows).into_iter().partition(|row| f(row));
        self.rows = kept;
        removed
    }

    /// Rewrite row paths; `f` returns the new path or `None` to leave a row alone
    pub fn relocate(&mut self, mut f: impl FnMut(&str) -> Option<String>) -> usize {
        let mut moved = 0;
        for row in &mut self.rows {
            if let Some(path) = f(&row.path) {
                row.path = path;
                moved += 1;
            }
        }
        moved
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            out.push_str(&format!(
                "{},{},{}\n",
                csv_field(&row.path),
                csv_field(&row.hash),
                csv_field(&row.size)
            ));
        }
        out
    }

    /// Rewrite the RECORD at the location it was read from
    pub fn save(&self) -> Result<()> {
        fs::write(&self.location, self.to_csv())?;
        Ok(())
    }
}
