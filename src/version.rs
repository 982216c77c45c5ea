// src/version.rs

//! Source-ecosystem version handling (PEP 440)
//!
//! Versions are parsed with the canonical PEP 440 pattern and ordered the way
//! the Python packaging tools order them: epoch, release (trailing zeros
//! ignored), pre-release, post-release, dev-release, local segment.
//! Specifiers (`>=1.0,<2`) are used when choosing which artifact to fetch and
//! when checking an artifact's `Requires-Python` against the target interpreter.

use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^\s*
        v?
        (?:(?P<epoch>[0-9]+)!)?
        (?P<release>[0-9]+(?:\.[0-9]+)*)
        (?P<pre>
            [-_.]?
            (?P<pre_l>alpha|beta|preview|pre|rc|a|b|c)
            [-_.]?
            (?P<pre_n>[0-9]+)?
        )?
        (?P<post>
            (?:-(?P<post_n1>[0-9]+))
            |
            (?:[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>[0-9]+)?)
        )?
        (?P<dev>
            [-_.]?
            (?P<dev_l>dev)
            [-_.]?
            (?P<dev_n>[0-9]+)?
        )?
        (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
        \s*$",
    )
    .expect("PEP 440 version pattern is valid")
});

/// Version and specifier parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("invalid version: '{0}'")]
    InvalidVersion(String),
    #[error("invalid specifier: '{0}'")]
    InvalidSpecifier(String),
}

/// Pre-release phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Alpha,
    Beta,
    Rc,
}

impl PreRelease {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Alpha => "a",
            Self::Beta => "b",
            Self::Rc => "rc",
        }
    }
}

/// One dot-separated piece of a local version label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocalSegment {
    Number(u64),
    Text(String),
}

impl Ord for LocalSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            // Numeric segments sort after alphanumeric ones
            (Self::Number(_), Self::Text(_)) => Ordering::Greater,
            (Self::Text(_), Self::Number(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for LocalSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed PEP 440 version
#[derive(Debug, Clone)]
pub struct Version {
    pub epoch: u64,
    pub release: Vec<u64>,
    pub pre: Option<(PreRelease, u64)>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
    pub local: Vec<LocalSegment>,
}

fn parse_number(s: &str, raw: &str) -> Result<u64, VersionError> {
    s.parse()
        .map_err(|_| VersionError::InvalidVersion(raw.to_string()))
}

impl Version {
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let lowered = s.to_lowercase();
        let caps = VERSION_RE
            .captures(&lowered)
            .ok_or_else(|| VersionError::InvalidVersion(s.to_string()))?;

        let epoch = match caps.name("epoch") {
            Some(m) => parse_number(m.as_str(), s)?,
            None => 0,
        };

        let release = caps["release"]
            .split('.')
            .map(|part| parse_number(part, s))
            .collect::<Result<Vec<_>, _>>()?;

        let pre = match caps.name("pre_l") {
            Some(label) => {
                let phase = match label.as_str() {
                    "a" | "alpha" => PreRelease::Alpha,
                    "b" | "beta" => PreRelease::Beta,
                    _ => PreRelease::Rc,
                };
                let n = match caps.name("pre_n") {
                    Some(m) => parse_number(m.as_str(), s)?,
                    None => 0,
                };
                Some((phase, n))
            }
            None => None,
        };

        let post = if let Some(m) = caps.name("post_n1") {
            Some(parse_number(m.as_str(), s)?)
        } else if caps.name("post_l").is_some() {
            match caps.name("post_n2") {
                Some(m) => Some(parse_number(m.as_str(), s)?),
                None => Some(0),
            }
        } else {
            None
        };

        let dev = match caps.name("dev_l") {
            Some(_) => match caps.name("dev_n") {
                Some(m) => Some(parse_number(m.as_str(), s)?),
                None => Some(0),
            },
            None => None,
        };

        let local = caps
            .name("local")
            .map(|m| {
                m.as_str()
                    .split(['.', '-', '_'])
                    .map(|seg| match seg.parse::<u64>() {
                        Ok(n) => LocalSegment::Number(n),
                        Err(_) => LocalSegment::Text(seg.to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    /// Pre-releases and dev-releases are both "pre-release" for selection purposes
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    pub fn is_postrelease(&self) -> bool {
        self.post.is_some()
    }

    /// The version without its local label
    pub fn public(&self) -> Version {
        Version {
            local: Vec::new(),
            ..self.clone()
        }
    }

    /// Epoch and release only (`1!2.0rc1.post3` -> `1!2.0`)
    pub fn base(&self) -> Version {
        Version {
            epoch: self.epoch,
            release: self.release.clone(),
            pre: None,
            post: None,
            dev: None,
            local: Vec::new(),
        }
    }

    /// `major.minor` tuple, defaulting missing pieces to zero
    pub fn major_minor(&self) -> (u64, u64) {
        (
            self.release.first().copied().unwrap_or(0),
            self.release.get(1).copied().unwrap_or(0),
        )
    }

    fn trimmed_release(&self) -> &[u64] {
        let mut end = self.release.len();
        while end > 1 && self.release[end - 1] == 0 {
            end -= 1;
        }
        &self.release[..end]
    }
}

/// Sort key component with explicit infinities, mirroring packaging's `_cmpkey`
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Bound<T> {
    NegInfinity,
    Value(T),
    Infinity,
}

impl Version {
    fn pre_key(&self) -> Bound<(PreRelease, u64)> {
        match (self.pre, self.post, self.dev) {
            // A bare dev release sorts before any pre-release of the same version
            (None, None, Some(_)) => Bound::NegInfinity,
            (None, _, _) => Bound::Infinity,
            (Some(pre), _, _) => Bound::Value(pre),
        }
    }

    fn post_key(&self) -> Bound<u64> {
        self.post.map_or(Bound::NegInfinity, Bound::Value)
    }

    fn dev_key(&self) -> Bound<u64> {
        self.dev.map_or(Bound::Infinity, Bound::Value)
    }

    fn local_key(&self) -> Bound<&[LocalSegment]> {
        if self.local.is_empty() {
            Bound::NegInfinity
        } else {
            Bound::Value(&self.local)
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.trimmed_release().cmp(other.trimmed_release()))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post_key().cmp(&other.post_key()))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
            .then_with(|| self.local_key().cmp(&other.local_key()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some((phase, n)) = self.pre {
            write!(f, "{}{}", phase.as_str(), n)?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{n}")?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{n}")?;
        }
        if !self.local.is_empty() {
            let local: Vec<String> = self
                .local
                .iter()
                .map(|seg| match seg {
                    LocalSegment::Number(n) => n.to_string(),
                    LocalSegment::Text(s) => s.clone(),
                })
                .collect();
            write!(f, "+{}", local.join("."))?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Comparison operator of a single specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Compatible,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
    Arbitrary,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compatible => "~=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessEqual => "<=",
            Self::GreaterEqual => ">=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::Arbitrary => "===",
        }
    }
}

/// Operators ordered so that longer tokens are tried first
const OPERATORS: [(&str, Operator); 8] = [
    ("===", Operator::Arbitrary),
    ("~=", Operator::Compatible),
    ("==", Operator::Equal),
    ("!=", Operator::NotEqual),
    ("<=", Operator::LessEqual),
    (">=", Operator::GreaterEqual),
    ("<", Operator::Less),
    (">", Operator::Greater),
];

/// A single version clause such as `>=1.0` or `==2.*`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Specifier {
    pub operator: Operator,
    /// Version text exactly as written, without the `.*` suffix
    pub version: String,
    pub wildcard: bool,
}

impl Specifier {
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        let (operator, rest) = OPERATORS
            .iter()
            .find_map(|(token, op)| s.strip_prefix(token).map(|rest| (*op, rest.trim())))
            .ok_or_else(|| VersionError::InvalidSpecifier(s.to_string()))?;

        if rest.is_empty() {
            return Err(VersionError::InvalidSpecifier(s.to_string()));
        }

        let (version, wildcard) = match rest.strip_suffix(".*") {
            Some(prefix) if matches!(operator, Operator::Equal | Operator::NotEqual) => {
                (prefix.to_string(), true)
            }
            Some(_) => return Err(VersionError::InvalidSpecifier(s.to_string())),
            None => (rest.to_string(), false),
        };

        if operator != Operator::Arbitrary {
            let parsed = Version::parse(&version)
                .map_err(|_| VersionError::InvalidSpecifier(s.to_string()))?;
            if operator == Operator::Compatible && parsed.release.len() < 2 {
                return Err(VersionError::InvalidSpecifier(s.to_string()));
            }
        }

        Ok(Self {
            operator,
            version,
            wildcard,
        })
    }

    /// Whether `candidate` satisfies this clause
    pub fn contains(&self, candidate: &Version) -> bool {
        if self.operator == Operator::Arbitrary {
            return candidate.to_string().eq_ignore_ascii_case(&self.version);
        }
        let Ok(spec) = Version::parse(&self.version) else {
            return false;
        };

        match self.operator {
            Operator::Equal if self.wildcard => prefix_match(&spec, candidate),
            Operator::NotEqual if self.wildcard => !prefix_match(&spec, candidate),
            Operator::Equal => equal_match(&spec, candidate),
            Operator::NotEqual => !equal_match(&spec, candidate),
            Operator::LessEqual => candidate.public() <= spec,
            Operator::GreaterEqual => candidate.public() >= spec,
            Operator::Less => {
                let candidate = candidate.public();
                candidate < spec
                    && !(candidate.is_prerelease()
                        && !spec.is_prerelease()
                        && candidate.base() == spec.base())
            }
            Operator::Greater => {
                let candidate = candidate.public();
                candidate > spec
                    && !(candidate.is_postrelease()
                        && !spec.is_postrelease()
                        && candidate.base() == spec.base())
            }
            Operator::Compatible => {
                let mut prefix = spec.base();
                prefix.release.pop();
                candidate.public() >= spec && prefix_match(&prefix, candidate)
            }
            Operator::Arbitrary => false,
        }
    }
}

fn equal_match(spec: &Version, candidate: &Version) -> bool {
    if spec.local.is_empty() {
        candidate.public() == *spec
    } else {
        candidate == spec
    }
}

fn prefix_match(prefix: &Version, candidate: &Version) -> bool {
    if prefix.epoch != candidate.epoch {
        return false;
    }
    (0..prefix.release.len()).all(|i| {
        prefix.release[i] == candidate.release.get(i).copied().unwrap_or(0)
    })
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator.as_str(), self.version)?;
        if self.wildcard {
            write!(f, ".*")?;
        }
        Ok(())
    }
}

/// A comma-separated conjunction of specifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SpecifierSet {
    pub specifiers: Vec<Specifier>,
}

impl SpecifierSet {
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let specifiers = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Specifier::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { specifiers })
    }

    pub fn is_empty(&self) -> bool {
        self.specifiers.is_empty()
    }

    /// Whether every clause admits `candidate`.
    ///
    /// Pre-releases are rejected unless `allow_prereleases` is set or a clause
    /// itself names a pre-release.
    pub fn contains(&self, candidate: &Version, allow_prereleases: bool) -> bool {
        if candidate.is_prerelease() && !allow_prereleases && !self.mentions_prerelease() {
            return false;
        }
        self.specifiers.iter().all(|spec| spec.contains(candidate))
    }

    fn mentions_prerelease(&self) -> bool {
        self.specifiers.iter().any(|spec| {
            spec.operator != Operator::NotEqual
                && Version::parse(&spec.version).is_ok_and(|v| v.is_prerelease())
        })
    }
}

impl fmt::Display for SpecifierSet {
    /// Clauses sorted lexicographically and comma-joined, like `packaging`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.specifiers.iter().map(ToString::to_string).collect();
        parts.sort();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for SpecifierSet {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_display_normalizes() {
        assert_eq!(v("1.0").to_string(), "1.0");
        assert_eq!(v("1.0-alpha.1").to_string(), "1.0a1");
        assert_eq!(v("2!1.0.post2.dev3+local.7").to_string(), "2!1.0.post2.dev3+local.7");
        assert_eq!(v("1.0-1").to_string(), "1.0.post1");
        assert_eq!(v("V1.2RC3").to_string(), "1.2rc3");
        assert!(Version::parse("not a version").is_err());
    }

    #[test]
    fn test_ordering() {
        let ordered = [
            "1.0.dev0", "1.0a1", "1.0a2.dev1", "1.0a2", "1.0b1", "1.0rc1", "1.0", "1.0+abc",
            "1.0+5", "1.0.post1.dev0", "1.0.post1", "1.1", "1!0.1",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
        assert_eq!(v("1.0"), v("1.0.0"));
    }

    #[test]
    fn test_specifier_basic() {
        let set = SpecifierSet::parse(">=1.0, <2").unwrap();
        assert!(set.contains(&v("1.5"), false));
        assert!(!set.contains(&v("2.0"), false));
        assert!(!set.contains(&v("0.9"), false));
        assert!(!set.contains(&v("1.6rc1"), false));
        assert!(set.contains(&v("1.6rc1"), true));
    }

    #[test]
    fn test_specifier_wildcard_and_compatible() {
        let eq = Specifier::parse("==3.*").unwrap();
        assert!(eq.contains(&v("3.12.1")));
        assert!(!eq.contains(&v("4.0")));

        let compat = Specifier::parse("~=2.2").unwrap();
        assert!(compat.contains(&v("2.3")));
        assert!(!compat.contains(&v("3.0")));
        assert!(!compat.contains(&v("2.1")));

        assert!(Specifier::parse("~=2").is_err());
        assert!(Specifier::parse(">=1.*").is_err());
    }

    #[test]
    fn test_exclusive_ordering_rules() {
        // <1.0 excludes 1.0 pre-releases, >1.0 excludes 1.0 post-releases
        assert!(!Specifier::parse("<1.0").unwrap().contains(&v("1.0rc1")));
        assert!(!Specifier::parse(">1.0").unwrap().contains(&v("1.0.post1")));
        assert!(Specifier::parse(">1.0").unwrap().contains(&v("1.0.1")));
    }

    #[test]
    fn test_requires_python_style() {
        let set = SpecifierSet::parse(">=3.8,!=3.9.*").unwrap();
        assert!(set.contains(&v("3.12"), false));
        assert!(!set.contains(&v("3.9.2"), false));
        assert!(!set.contains(&v("3.7"), false));
    }

    #[test]
    fn test_set_display_sorted() {
        let set = SpecifierSet::parse("<2, >=1.0").unwrap();
        assert_eq!(set.to_string(), "<2,>=1.0");
        assert!(SpecifierSet::parse("").unwrap().is_empty());
    }
}
