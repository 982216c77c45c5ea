// src/fetch.rs

//! Source-ecosystem artifact retrieval
//!
//! A [`Fetcher`] turns a requirement into a wheel on local disk. Two
//! implementations share the same selection rules:
//! - [`PypiFetcher`] queries PEP 691 JSON simple indexes over HTTP
//! - [`FindLinksFetcher`] picks from a local directory of distribution files
//!
//! Selection skips yanked files, wheels whose tags or `Requires-Python` do not
//! fit the target, and pre-releases unless nothing else matches. Among the
//! rest the highest version wins, then the best tag. A project that publishes
//! only source distributions is a hard failure, not something to retry.

use crate::error::{Error, Result};
use crate::hash::{Hash, HashAlgorithm, HashError, verify_file};
use crate::mapping::canonicalize_name;
use crate::requirement::Requirement;
use crate::tags::{TargetEnvironment, WheelFilename};
use crate::version::{SpecifierSet, Version};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::cmp::Reverse;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for a request that fails at the transport level
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

const SIMPLE_JSON: &str = "application/vnd.pypi.simple.v1+json";

/// Wording used when a project has no wheels at all
pub const ONLY_SDIST_REASON: &str = "only source distributions are available";

/// A wheel fetched to local disk, ready for conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Canonical project name
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub filename: WheelFilename,
}

impl Artifact {
    /// Describe a wheel already on disk from its filename
    pub fn from_wheel(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Metadata(format!("invalid wheel path: {}", path.display())))?;
        let filename = WheelFilename::parse(file_name)?;
        Ok(Self {
            name: filename.name.clone(),
            version: filename.version.clone(),
            path: path.to_path_buf(),
            filename,
        })
    }
}

/// Obtains the best installable artifact for a requirement
pub trait Fetcher {
    fn fetch(
        &self,
        requirement: &Requirement,
        target: &TargetEnvironment,
        dest: &Path,
    ) -> Result<Artifact>;
}

/// Yanked flag: PEP 691 allows `false`, `true` or a reason string
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Yanked {
    Flag(bool),
    Reason(String),
}

impl Default for Yanked {
    fn default() -> Self {
        Yanked::Flag(false)
    }
}

impl Yanked {
    pub fn is_yanked(&self) -> bool {
        match self {
            Yanked::Flag(flag) => *flag,
            Yanked::Reason(_) => true,
        }
    }
}

/// One file of a project, from an index page or a directory listing
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DistFile {
    pub filename: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub hashes: std::collections::HashMap<String, String>,
    #[serde(default, rename = "requires-python")]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub yanked: Yanked,
}

impl DistFile {
    pub fn is_wheel(&self) -> bool {
        self.filename.ends_with(".whl")
    }

    /// Digest to check the download against; SHA-256 wins over MD5
    pub fn expected_hash(&self) -> std::result::Result<Option<Hash>, HashError> {
        let mut best: Option<(HashAlgorithm, &str)> = None;
        for (name, value) in &self.hashes {
            let Ok(algorithm) = name.parse::<HashAlgorithm>() else {
                continue;
            };
            if best.is_none_or(|(current, _)| {
                current != algorithm && algorithm == HashAlgorithm::Sha256
            }) {
                best = Some((algorithm, value.as_str()));
            }
        }
        best.map(|(algorithm, value)| Hash::new(algorithm, value)).transpose()
    }
}

/// PEP 691 project page
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectPage {
    pub name: String,
    #[serde(default)]
    pub files: Vec<DistFile>,
}

/// A selectable wheel with its parsed version and tag rank
#[derive(Debug, Clone)]
struct Candidate<'a> {
    file: &'a DistFile,
    wheel: WheelFilename,
    version: Version,
    rank: usize,
}

fn requires_python_ok(file: &DistFile, python: &Version) -> bool {
    match file.requires_python.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(spec) => match SpecifierSet::parse(spec) {
            Ok(set) => set.contains(python, true),
            Err(_) => {
                debug!("Ignoring unparseable Requires-Python '{}' on {}", spec, file.filename);
                true
            }
        },
    }
}

/// Choose the best wheel among `files` for `requirement` on `target`
pub fn select_wheel<'a>(
    project: &str,
    files: &'a [DistFile],
    specifier: &SpecifierSet,
    target: &TargetEnvironment,
) -> Result<&'a DistFile> {
    let python = target.python_version();
    let priorities = target.tag_priorities();

    let candidates: Vec<Candidate<'a>> = files
        .iter()
        .filter(|f| f.is_wheel() && !f.yanked.is_yanked())
        .filter_map(|file| {
            let wheel = WheelFilename::parse(&file.filename).ok()?;
            let version = Version::parse(&wheel.version).ok()?;
            let rank = target.rank(&wheel, &priorities)?;
            if !requires_python_ok(file, &python) {
                return None;
            }
            Some(Candidate {
                file,
                wheel,
                version,
                rank,
            })
        })
        .collect();

    let pick = |allow_pre: bool| {
        candidates
            .iter()
            .filter(|c| specifier.contains(&c.version, allow_pre))
            .max_by_key(|c| (c.version.clone(), Reverse(c.rank)))
    };

    if let Some(best) = pick(false).or_else(|| pick(true)) {
        debug!(
            "Selected {} (rank {}, tags {:?})",
            best.file.filename, best.rank, best.wheel.platform_tags
        );
        return Ok(best.file);
    }

    let reason = if files.is_empty() {
        "no distribution files are published".to_string()
    } else if !files.iter().any(DistFile::is_wheel) {
        ONLY_SDIST_REASON.to_string()
    } else {
        let spec = if specifier.is_empty() {
            String::new()
        } else {
            format!(" matching '{specifier}'")
        };
        format!(
            "no wheel{spec} is installable on cp{}{} {}",
            target.python_major, target.python_minor, target.subdir
        )
    };

    Err(Error::NoCompatibleArtifact {
        package: project.to_string(),
        reason,
    })
}

/// Fetches wheels from PEP 691 JSON simple indexes
pub struct PypiFetcher {
    client: Client,
    index_urls: Vec<String>,
    max_retries: u32,
}

impl PypiFetcher {
    pub fn new(index_urls: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("graft/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            index_urls,
            max_retries: MAX_RETRIES,
        })
    }

    /// GET with retries on transport errors; HTTP status is returned as-is
    fn get(&self, url: &str, accept: Option<&str>) -> Result<reqwest::blocking::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self.client.get(url);
            if let Some(accept) = accept {
                request = request.header(reqwest::header::ACCEPT, accept);
            }
            match request.send() {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::Network(format!(
                            "GET {url} failed after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Request attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    /// Project page from the first index that knows the project
    pub fn project_page(&self, name: &str) -> Result<ProjectPage> {
        let canonical = canonicalize_name(name);
        for index in &self.index_urls {
            let url = format!("{}/{}/", index.trim_end_matches('/'), canonical);
            info!("Fetching project page {}", url);
            let response = self.get(&url, Some(SIMPLE_JSON))?;
            match response.status() {
                StatusCode::NOT_FOUND => {
                    debug!("{} not found on {}", canonical, index);
                    continue;
                }
                status if !status.is_success() => {
                    return Err(Error::Network(format!("HTTP {status} from {url}")));
                }
                _ => {}
            }
            let mut page: ProjectPage = response
                .json()
                .map_err(|e| Error::Network(format!("invalid index response from {url}: {e}")))?;
            // Relative file URLs are resolved against the page URL
            for file in &mut page.files {
                if let Ok(base) = url::Url::parse(&url)
                    && let Ok(joined) = base.join(&file.url)
                {
                    file.url = joined.to_string();
                }
            }
            return Ok(page);
        }
        Err(Error::PackageNotFound(canonical))
    }

    fn download(&self, file: &DistFile, dest: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dest)?;
        let target = dest.join(&file.filename);
        let temp_path = dest.join(format!("{}.part", file.filename));

        info!("Downloading {}", file.url);
        let mut response = self.get(&file.url, None)?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "HTTP {} from {}",
                response.status(),
                file.url
            )));
        }

        {
            let mut out = File::create(&temp_path)?;
            if let Err(e) = io::copy(&mut response, &mut out) {
                let _ = fs::remove_file(&temp_path);
                return Err(Error::Network(format!("download of {} interrupted: {e}", file.url)));
            }
        }

        if let Err(e) = check_digest(file, &temp_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        fs::rename(&temp_path, &target)?;
        Ok(target)
    }
}

/// Compare a download with the digest its index entry published
fn check_digest(file: &DistFile, path: &Path) -> Result<()> {
    let expected = file.expected_hash().map_err(|e| {
        Error::Network(format!("{}: index published a bad digest: {e}", file.filename))
    })?;
    match expected {
        Some(expected) => verify_file(path, &expected)
            .map_err(|e| Error::Network(format!("{}: {e}", file.filename))),
        None => Ok(()),
    }
}

impl Fetcher for PypiFetcher {
    fn fetch(
        &self,
        requirement: &Requirement,
        target: &TargetEnvironment,
        dest: &Path,
    ) -> Result<Artifact> {
        let page = self.project_page(&requirement.name)?;
        let file = select_wheel(&requirement.name, &page.files, &requirement.specifier, target)?;
        let path = self.download(file, dest)?;
        Artifact::from_wheel(&path)
    }
}

/// Picks wheels from a local directory (pip's `--find-links`)
#[derive(Debug, Clone)]
pub struct FindLinksFetcher {
    dirs: Vec<PathBuf>,
}

impl FindLinksFetcher {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Distribution files in the directories belonging to `name`
    fn files_for(&self, name: &str) -> Result<Vec<(DistFile, PathBuf)>> {
        let canonical = canonicalize_name(name);
        let mut found = Vec::new();
        for dir in &self.dirs {
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !belongs_to(filename, &canonical) {
                    continue;
                }
                found.push((
                    DistFile {
                        filename: filename.to_string(),
                        url: String::new(),
                        hashes: Default::default(),
                        requires_python: None,
                        yanked: Yanked::default(),
                    },
                    path,
                ));
            }
        }
        found.sort_by(|a, b| a.0.filename.cmp(&b.0.filename));
        Ok(found)
    }
}

/// Whether a wheel or sdist filename is a distribution of `canonical`
fn belongs_to(filename: &str, canonical: &str) -> bool {
    if filename.ends_with(".whl") {
        return WheelFilename::parse(filename).is_ok_and(|w| w.name == canonical);
    }
    let stem = [".tar.gz", ".zip", ".tar.bz2"]
        .iter()
        .find_map(|ext| filename.strip_suffix(ext));
    match stem.and_then(|s| s.rsplit_once('-')) {
        Some((name, _version)) => canonicalize_name(name) == canonical,
        None => false,
    }
}

impl Fetcher for FindLinksFetcher {
    fn fetch(
        &self,
        requirement: &Requirement,
        target: &TargetEnvironment,
        dest: &Path,
    ) -> Result<Artifact> {
        let found = self.files_for(&requirement.name)?;
        if found.is_empty() {
            return Err(Error::PackageNotFound(canonicalize_name(&requirement.name)));
        }
        let files: Vec<DistFile> = found.iter().map(|(f, _)| f.clone()).collect();
        let chosen = select_wheel(&requirement.name, &files, &requirement.specifier, target)?;
        let source = found
            .iter()
            .find(|(f, _)| f.filename == chosen.filename)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| Error::PackageNotFound(requirement.name.clone()))?;

        fs::create_dir_all(dest)?;
        let copied = dest.join(&chosen.filename);
        fs::copy(&source, &copied)?;
        info!("Using local wheel {}", source.display());
        Artifact::from_wheel(&copied)
    }
}
