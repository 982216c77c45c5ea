// src/spec.rs

//! Requested package specifications
//!
//! A [`PackageSpec`] is what a user asks for and what the solver receives.
//! Parsing accepts both conda MatchSpec shorthand (`numpy`, `numpy 1.26`,
//! `numpy >=1.0,<2`, `numpy=1.26`, `conda-forge::numpy`) and PEP 440 style
//! (`numpy==1.26`, `numpy>=1`). `Display` always renders conda syntax.
//!
//! Build strings (`numpy 1.26 py_0`, `numpy=1.26=py_0`) and bracket
//! qualifiers (`numpy[version='>=1']`) are rejected rather than guessed at.

use crate::error::{Error, Result};
use crate::mapping::NameMapping;
use std::fmt;
use std::str::FromStr;

/// A package name with an optional version constraint in conda syntax
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageSpec {
    pub name: String,
    /// Channel the package is pinned to (`channel::name`)
    pub channel: Option<String>,
    pub version: Option<String>,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "<>=!~.*,|_+".contains(c)
}

/// Characters that tie a whitespace-separated token to its neighbour
const JOINERS: &[char] = &['<', '>', '=', '!', '~', ','];

/// Join the version tokens of a spec, refusing a trailing build component
fn join_version(spec: &str, rest: &str) -> Result<String> {
    let mut groups: Vec<String> = Vec::new();
    for token in rest.split_whitespace() {
        match groups.last_mut() {
            Some(last) if last.ends_with(JOINERS) || token.starts_with(JOINERS) => {
                last.push_str(token)
            }
            _ => groups.push(token.to_string()),
        }
    }
    if groups.len() > 1 {
        return Err(Error::Metadata(format!(
            "unsupported package spec (build strings are not accepted): '{spec}'"
        )));
    }
    Ok(groups.pop().unwrap_or_default())
}

impl PackageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: None,
            version: None,
        }
    }

    pub fn with_version(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: None,
            version: Some(version.into()),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (channel, body) = match s.split_once("::") {
            Some((channel, body)) if !channel.trim().is_empty() => {
                (Some(channel.trim().to_string()), body.trim_start())
            }
            Some(_) => return Err(Error::Metadata(format!("empty channel in package spec: '{s}'"))),
            None => (None, s),
        };
        let split = body.find(|c: char| !is_name_char(c)).unwrap_or(body.len());
        let (name, rest) = body.split_at(split);

        if name.is_empty() {
            return Err(Error::Metadata(format!("invalid package spec: '{s}'")));
        }
        if let Some(bad) = rest.chars().find(|&c| !c.is_whitespace() && !is_version_char(c)) {
            return Err(Error::Metadata(format!(
                "unsupported package spec (unexpected '{bad}'): '{s}'"
            )));
        }

        let rest = join_version(s, rest)?;
        let version = if rest.is_empty() {
            None
        } else if let Some(fuzzy) = rest.strip_prefix('=').filter(|r| !r.starts_with('=')) {
            // `name=1.2` is conda's fuzzy match, equivalent to `1.2.*`
            if fuzzy.is_empty() || fuzzy.contains('=') {
                return Err(Error::Metadata(format!(
                    "unsupported package spec (build strings are not accepted): '{s}'"
                )));
            }
            Some(if fuzzy.ends_with('*') {
                fuzzy.to_string()
            } else {
                format!("{fuzzy}.*")
            })
        } else {
            Some(rest)
        };

        Ok(Self {
            name: name.to_string(),
            channel,
            version,
        })
    }

    /// PEP 508 requirement text for the source ecosystem.
    ///
    /// The name goes through the reverse alias table, so the result is only as
    /// good as that best-effort lookup.
    pub fn to_requirement(&self, mapping: &NameMapping) -> String {
        let name = mapping.to_pypi(&self.name);
        match &self.version {
            None => name,
            Some(version) => format!("{name}{}", pep440_constraint(version)),
        }
    }
}

/// Rewrite a conda version constraint into PEP 440 specifier syntax
fn pep440_constraint(version: &str) -> String {
    version
        .split(',')
        .map(|clause| {
            let clause = clause.trim();
            let bare = clause.starts_with(|c: char| c.is_ascii_digit());
            match clause.strip_suffix('*') {
                Some(prefix) if bare => {
                    format!("=={}.*", prefix.trim_end_matches('.'))
                }
                None if bare => format!("=={clause}"),
                _ => clause.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}::")?;
        }
        match &self.version {
            Some(version) => write!(f, "{} {}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for PackageSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(PackageSpec::parse("demo-package").unwrap(), PackageSpec::new("demo-package"));
        assert_eq!(
            PackageSpec::parse("numpy 1.26").unwrap(),
            PackageSpec::with_version("numpy", "1.26")
        );
        assert_eq!(
            PackageSpec::parse("numpy >=1.0, <2").unwrap(),
            PackageSpec::with_version("numpy", ">=1.0,<2")
        );
        assert_eq!(
            PackageSpec::parse("numpy=1.26").unwrap(),
            PackageSpec::with_version("numpy", "1.26.*")
        );
        assert_eq!(
            PackageSpec::parse("requests==2.31.0").unwrap(),
            PackageSpec::with_version("requests", "==2.31.0")
        );
        assert!(PackageSpec::parse("").is_err());
        assert!(PackageSpec::parse(">=1").is_err());
        assert!(PackageSpec::parse("numpy=1.26=py_0").is_err());
    }

    #[test]
    fn test_channel_prefix() {
        let spec = PackageSpec::parse("conda-forge::numpy >=1.26").unwrap();
        assert_eq!(spec.name, "numpy");
        assert_eq!(spec.channel.as_deref(), Some("conda-forge"));
        assert_eq!(spec.version.as_deref(), Some(">=1.26"));
        assert_eq!(spec.to_string(), "conda-forge::numpy >=1.26");

        let mapping = NameMapping::embedded().unwrap();
        assert_eq!(
            PackageSpec::parse("conda-forge::numpy").unwrap().to_requirement(&mapping),
            "numpy"
        );
        assert!(PackageSpec::parse("::numpy").is_err());
    }

    #[test]
    fn test_rejects_build_component_and_brackets() {
        for spec in [
            "numpy 1.0 py_0",
            "numpy 1.26.* *_cp312",
            "numpy[version='>=1']",
            "numpy[build=py_0]",
            "numpy (>=1)",
        ] {
            assert!(
                matches!(PackageSpec::parse(spec), Err(Error::Metadata(_))),
                "{spec} should be rejected"
            );
        }
        // Spaces around operators are still one constraint
        assert_eq!(
            PackageSpec::parse("numpy >= 1.0, < 2").unwrap().version.as_deref(),
            Some(">=1.0,<2")
        );
    }

    #[test]
    fn test_display_is_conda_syntax() {
        assert_eq!(PackageSpec::parse("numpy>=1,<2").unwrap().to_string(), "numpy >=1,<2");
        assert_eq!(PackageSpec::new("ach").to_string(), "ach");
    }

    #[test]
    fn test_to_requirement() {
        let mapping = NameMapping::embedded().unwrap();
        assert_eq!(
            PackageSpec::parse("numpy=1.26").unwrap().to_requirement(&mapping),
            "numpy==1.26.*"
        );
        assert_eq!(
            PackageSpec::parse("numpy 1.26").unwrap().to_requirement(&mapping),
            "numpy==1.26"
        );
        assert_eq!(
            PackageSpec::parse("pytorch >=2,<3").unwrap().to_requirement(&mapping),
            "torch>=2,<3"
        );
        assert_eq!(
            PackageSpec::new("zope.interface").to_requirement(&mapping),
            "zope-interface"
        );
    }
}
