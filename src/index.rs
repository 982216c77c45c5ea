// src/index.rs

//! Local channel repository and its index
//!
//! The repository is a directory with one subdirectory per platform
//! (`noarch`, `linux-64`, ...). Each holds `.conda` archives and a
//! `repodata.json` regenerated purely from the archives on disk, so the index
//! never names an archive that is not there and never misses one that is.
//! Index files are replaced atomically so a concurrent solver never reads a
//! half-written file.

use crate::archive::{CONDA_EXTENSION, read_index_json};
use crate::error::{Error, Result};
use crate::hash::md5_and_sha256_file;
use crate::record::NOARCH_SUBDIR;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const REPODATA: &str = "repodata.json";
pub const REPODATA_ZST: &str = "repodata.json.zst";
pub const CHANNELDATA: &str = "channeldata.json";

const REPODATA_VERSION: u32 = 1;
const ZST_LEVEL: i32 = 19;

/// `info` block of `repodata.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub subdir: String,
}

/// One subdir's `repodata.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoData {
    pub info: RepoInfo,
    #[serde(default)]
    pub packages: BTreeMap<String, Value>,
    #[serde(rename = "packages.conda", default)]
    pub packages_conda: BTreeMap<String, Value>,
    #[serde(default)]
    pub removed: Vec<String>,
    pub repodata_version: u32,
}

impl RepoData {
    fn empty(subdir: &str) -> Self {
        Self {
            info: RepoInfo {
                subdir: subdir.to_string(),
            },
            repodata_version: REPODATA_VERSION,
            ..Default::default()
        }
    }

    /// Number of archives described
    pub fn len(&self) -> usize {
        self.packages.len() + self.packages_conda.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-package summary in `channeldata.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPackage {
    pub version: String,
    pub subdirs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub license: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData {
    pub channeldata_version: u32,
    pub packages: BTreeMap<String, ChannelPackage>,
    pub subdirs: Vec<String>,
}

/// Replace `path` with `data` via a temp file in the same directory
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Index(format!("{} has no parent directory", path.display())))?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// A local channel directory
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
    write_zst: bool,
}

impl Repository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_zst: true,
        }
    }

    /// Also write `repodata.json.zst` next to each index
    pub fn with_zst(mut self, write_zst: bool) -> Self {
        self.write_zst = write_zst;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subdir_path(&self, subdir: &str) -> PathBuf {
        self.root.join(subdir)
    }

    /// `file://` URL usable as a solver channel
    pub fn channel_url(&self) -> Result<String> {
        let absolute = if self.root.is_absolute() {
            self.root.clone()
        } else {
            std::env::current_dir()?.join(&self.root)
        };
        url::Url::from_directory_path(&absolute)
            .map(|u| u.to_string())
            .map_err(|_| Error::Index(format!("cannot express {} as a URL", absolute.display())))
    }

    /// Platform subdirectories present, always including `noarch`
    pub fn subdirs(&self) -> Result<Vec<String>> {
        let mut subdirs = BTreeSet::from([NOARCH_SUBDIR.to_string()]);
        if self.root.is_dir() {
            for entry in fs::read_dir(&self.root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str()
                    && !name.starts_with('.')
                {
                    subdirs.insert(name.to_string());
                }
            }
        }
        Ok(subdirs.into_iter().collect())
    }

    /// `.conda` archives in a subdir, sorted by file name
    pub fn archives(&self, subdir: &str) -> Result<Vec<PathBuf>> {
        let dir = self.subdir_path(subdir);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut archives = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(CONDA_EXTENSION))
            {
                archives.push(path);
            }
        }
        archives.sort();
        Ok(archives)
    }

    /// Build the index if any subdir lacks one
    pub fn ensure_index(&self) -> Result<()> {
        fs::create_dir_all(self.subdir_path(NOARCH_SUBDIR))?;
        let missing = self
            .subdirs()?
            .iter()
            .any(|s| !self.subdir_path(s).join(REPODATA).is_file());
        if missing || !self.root.join(CHANNELDATA).is_file() {
            self.rebuild_index()?;
        } else {
            debug!("Index present in {}", self.root.display());
        }
        Ok(())
    }

    /// Regenerate every subdir's index from the archives on disk
    ///
    /// Returns the number of archives indexed per subdir.
    pub fn rebuild_index(&self) -> Result<BTreeMap<String, usize>> {
        fs::create_dir_all(self.subdir_path(NOARCH_SUBDIR))?;
        let mut counts = BTreeMap::new();
        let mut indexes = BTreeMap::new();

        for subdir in self.subdirs()? {
            let repodata = self.index_subdir(&subdir)?;
            self.write_repodata(&subdir, &repodata)?;
            counts.insert(subdir.clone(), repodata.len());
            indexes.insert(subdir, repodata);
        }

        let channeldata = channeldata(&indexes);
        write_atomic(
            &self.root.join(CHANNELDATA),
            serde_json::to_string_pretty(&channeldata)?.as_bytes(),
        )?;

        info!(
            "Rebuilt index of {} ({} archives)",
            self.root.display(),
            counts.values().sum::<usize>()
        );
        Ok(counts)
    }

    fn index_subdir(&self, subdir: &str) -> Result<RepoData> {
        let mut repodata = RepoData::empty(subdir);
        for path in self.archives(subdir)? {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            match index_entry(&path) {
                Ok(entry) => {
                    repodata.packages_conda.insert(filename, Value::Object(entry));
                }
                Err(e) => warn!("Skipping unreadable archive {}: {}", path.display(), e),
            }
        }
        Ok(repodata)
    }

    fn write_repodata(&self, subdir: &str, repodata: &RepoData) -> Result<()> {
        let dir = self.subdir_path(subdir);
        let json = serde_json::to_string_pretty(repodata)?;
        write_atomic(&dir.join(REPODATA), json.as_bytes())?;

        let zst_path = dir.join(REPODATA_ZST);
        if self.write_zst {
            let compressed = zstd::stream::encode_all(json.as_bytes(), ZST_LEVEL)?;
            write_atomic(&zst_path, &compressed)?;
        } else if zst_path.exists() {
            // A stale compressed copy would disagree with repodata.json
            fs::remove_file(&zst_path)?;
        }
        debug!("Indexed {} archives in {}", repodata.len(), subdir);
        Ok(())
    }

    /// Parsed `repodata.json` of a subdir
    pub fn read_repodata(&self, subdir: &str) -> Result<RepoData> {
        let path = self.subdir_path(subdir).join(REPODATA);
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::Index(format!("cannot read {}: {e}", path.display())))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// `index.json` of an archive plus its checksums and size
fn index_entry(path: &Path) -> Result<Map<String, Value>> {
    let mut entry = read_index_json(path)?;
    let (md5, sha256) = md5_and_sha256_file(path)?;
    let size = fs::metadata(path)?.len();
    entry.insert("md5".into(), Value::String(md5));
    entry.insert("sha256".into(), Value::String(sha256));
    entry.insert("size".into(), Value::from(size));
    Ok(entry)
}

fn newer(candidate: &str, current: &str) -> bool {
    match (Version::parse(candidate), Version::parse(current)) {
        (Ok(a), Ok(b)) => a > b,
        _ => candidate > current,
    }
}

fn channeldata(indexes: &BTreeMap<String, RepoData>) -> ChannelData {
    let mut packages: BTreeMap<String, ChannelPackage> = BTreeMap::new();
    for (subdir, repodata) in indexes {
        for entry in repodata.packages_conda.values().chain(repodata.packages.values()) {
            let (Some(name), Some(version)) = (
                entry.get("name").and_then(Value::as_str),
                entry.get("version").and_then(Value::as_str),
            ) else {
                continue;
            };
            let package = packages.entry(name.to_string()).or_default();
            if package.version.is_empty() || newer(version, &package.version) {
                package.version = version.to_string();
                package.license = entry
                    .get("license")
                    .and_then(Value::as_str)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string);
            }
            if !package.subdirs.contains(subdir) {
                package.subdirs.push(subdir.clone());
            }
        }
    }
    ChannelData {
        channeldata_version: 1,
        packages,
        subdirs: indexes.keys().cloned().collect(),
    }
}
