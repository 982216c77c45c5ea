// src/config.rs

//! Configuration file parsing
//!
//! `graft` reads an optional TOML file, by default
//! `$XDG_CONFIG_HOME/graft/config.toml`. Every key is optional:
//!
//! ```toml
//! repo = "/var/cache/graft/repo"
//! channels = ["conda-forge"]
//! override_channels = false
//! max_attempts = 20
//! index_urls = ["https://pypi.org/simple/"]
//! find_links = ["/srv/wheels"]
//! mapping_file = "/etc/graft/mapping.json"
//! solver_command = "conda"
//! build_python = "python3"
//! write_zst = true
//! python = "3.12"
//! subdir = "linux-64"
//! ```

use crate::engine::DEFAULT_MAX_ATTEMPTS;
use crate::error::{Error, Result};
use crate::tags::TargetEnvironment;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "graft";

/// TOML configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraftConfig {
    /// Local channel that converted packages are written to
    #[serde(default = "default_repo")]
    pub repo: PathBuf,

    /// Upstream conda channels, searched after the local repository
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,

    #[serde(default)]
    pub override_channels: bool,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// PEP 691 simple index roots, tried in order
    #[serde(default = "default_index_urls")]
    pub index_urls: Vec<String>,

    /// Local directories of wheels used instead of the indexes when non-empty
    #[serde(default)]
    pub find_links: Vec<PathBuf>,

    /// Full grayskull-format alias table replacing the built-in seed
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,

    #[serde(default = "default_solver_command")]
    pub solver_command: String,

    /// Interpreter that builds local projects when no prefix is given
    #[serde(default = "default_build_python")]
    pub build_python: String,

    /// Write `repodata.json.zst` alongside each index
    #[serde(default = "default_true")]
    pub write_zst: bool,

    /// Target interpreter, `major.minor`
    #[serde(default = "default_python")]
    pub python: String,

    /// Target platform subdir
    #[serde(default = "TargetEnvironment::host_subdir")]
    pub subdir: String,
}

impl Default for GraftConfig {
    fn default() -> Self {
        Self {
            repo: default_repo(),
            channels: default_channels(),
            override_channels: false,
            max_attempts: default_max_attempts(),
            index_urls: default_index_urls(),
            find_links: Vec::new(),
            mapping_file: None,
            solver_command: default_solver_command(),
            build_python: default_build_python(),
            write_zst: true,
            python: default_python(),
            subdir: TargetEnvironment::host_subdir(),
        }
    }
}

fn default_repo() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("repo")
}

fn default_channels() -> Vec<String> {
    vec!["conda-forge".to_string()]
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_index_urls() -> Vec<String> {
    vec!["https://pypi.org/simple/".to_string()]
}

fn default_solver_command() -> String {
    "conda".to_string()
}

fn default_build_python() -> String {
    "python3".to_string()
}

fn default_python() -> String {
    "3.12".to_string()
}

fn default_true() -> bool {
    true
}

impl GraftConfig {
    /// `$XDG_CONFIG_HOME/graft/config.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location if it exists, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::load_from(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let config = Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: GraftConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.index_urls.is_empty() && self.find_links.is_empty() {
            return Err(Error::Config(
                "at least one of index_urls or find_links is required".to_string(),
            ));
        }
        for url in &self.index_urls {
            url::Url::parse(url).map_err(|e| Error::Config(format!("Invalid index URL {url}: {e}")))?;
        }
        self.target()?;
        Ok(())
    }

    /// Interpreter and platform that artifacts are selected for
    pub fn target(&self) -> Result<TargetEnvironment> {
        TargetEnvironment::new(&self.python, &self.subdir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = GraftConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channels, vec!["conda-forge"]);
        assert_eq!(config.max_attempts, 20);
        assert_eq!(config.solver_command, "conda");
        assert_eq!(config.build_python, "python3");
        assert!(config.write_zst);
        assert!(config.repo.ends_with("graft/repo"));
    }

    #[test]
    fn test_parse_toml() {
        let config = GraftConfig::parse(
            r#"
            repo = "/srv/repo"
            channels = ["conda-forge", "bioconda"]
            max_attempts = 5
            python = "3.11"
            subdir = "osx-arm64"
            write_zst = false
            build_python = "/opt/py/bin/python"
            "#,
        )
        .unwrap();
        assert_eq!(config.repo, PathBuf::from("/srv/repo"));
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.max_attempts, 5);
        assert!(!config.write_zst);
        assert_eq!(config.build_python, "/opt/py/bin/python");
        assert_eq!(config.index_urls, default_index_urls());
        let target = config.target().unwrap();
        assert_eq!(target.python_short(), "3.11");
        assert_eq!(target.subdir, "osx-arm64");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            GraftConfig::parse("index_urls = [\"not a url\"]"),
            Err(Error::Config(_))
        ));
        assert!(GraftConfig::parse("python = \"2.7\"").is_err());
        assert!(GraftConfig::parse("no_such_key = 1").is_err());
        assert!(GraftConfig::parse("index_urls = []").is_err());
        assert!(GraftConfig::parse("index_urls = []\nfind_links = [\"/w\"]").is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_attempts = 3\n").unwrap();
        assert_eq!(GraftConfig::load(Some(&path)).unwrap().max_attempts, 3);
        assert!(GraftConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
