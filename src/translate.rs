// src/translate.rs

//! Dependency translation from PyPI requirement strings to conda constraints
//!
//! Each `Requires-Dist` entry becomes `<conda-name> <specifier>`. Conda has
//! no optional dependency groups, so anything guarded by `extra == "x"` is
//! filed under `extras["x"]` and never lands in the main constraint list.
//! Other environment markers are evaluated against the target environment
//! when one is configured; without one the dependency is kept.

use crate::mapping::{NameMapping, canonicalize_name};
use crate::requirement::{MarkerEnvironment, Requirement};
use crate::version::{Operator, SpecifierSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of translating a list of dependency strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translation {
    pub constraints: Vec<String>,
    pub extras: BTreeMap<String, Vec<String>>,
}

/// Converts source-ecosystem requirements into target constraint syntax
#[derive(Debug, Clone)]
pub struct Translator {
    mapping: Arc<NameMapping>,
    environment: Option<MarkerEnvironment>,
}

impl Translator {
    pub fn new(mapping: Arc<NameMapping>) -> Self {
        Self {
            mapping,
            environment: None,
        }
    }

    /// Evaluate non-extra markers against `environment`
    pub fn with_environment(mut self, environment: MarkerEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn mapping(&self) -> &NameMapping {
        &self.mapping
    }

    pub fn translate<S: AsRef<str>>(&self, requirements: &[S]) -> Translation {
        let mut out = Translation::default();

        for raw in requirements {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }

            let req = match Requirement::parse(raw) {
                Ok(req) => req,
                Err(e) => {
                    // Keep the string rather than silently losing a dependency
                    warn!("Cannot translate requirement, keeping it verbatim: {}", e);
                    out.constraints.push(raw.to_string());
                    continue;
                }
            };

            let constraint = self.to_conda(&req);
            let extras = req.extra_names();

            if !extras.is_empty() {
                for extra in extras {
                    let applies = match (&self.environment, &req.marker) {
                        (Some(env), Some(marker)) => marker.evaluate(env, Some(&extra)),
                        _ => true,
                    };
                    if applies {
                        out.extras.entry(extra).or_default().push(constraint.clone());
                    } else {
                        debug!("Dropping '{}' from extra '{}': marker is false", raw, extra);
                    }
                }
                continue;
            }

            if let (Some(env), Some(marker)) = (&self.environment, &req.marker)
                && !marker.evaluate(env, None)
            {
                debug!("Dropping '{}': marker is false for the target", raw);
                continue;
            }

            out.constraints.push(constraint);
        }

        out
    }

    /// `<conda-name> <specifier>` for one parsed requirement
    pub fn to_conda(&self, req: &Requirement) -> String {
        let name = self.mapping.to_conda(&canonicalize_name(&req.name));
        if !req.extras.is_empty() {
            debug!(
                "Requirement {} asks for extras {:?}; conda cannot express them",
                req.name, req.extras
            );
        }
        if req.url.is_some() {
            warn!("Direct URL requirement {} reduced to its name", req.name);
            return name;
        }
        format!("{} {}", name, conda_specifier(&req.specifier))
            .trim()
            .to_string()
    }
}

/// Render a PEP 440 specifier set in MatchSpec-compatible form.
///
/// Clause order follows `SpecifierSet`'s sorted rendering; `===` has no conda
/// counterpart and is downgraded to `==`.
pub fn conda_specifier(set: &SpecifierSet) -> String {
    let mut clauses: Vec<String> = set
        .specifiers
        .iter()
        .map(|spec| {
            let op = match spec.operator {
                Operator::Arbitrary => Operator::Equal,
                other => other,
            };
            let wildcard = if spec.wildcard { ".*" } else { "" };
            format!("{}{}{}", op.as_str(), spec.version, wildcard)
        })
        .collect();
    clauses.sort();
    clauses.join(",")
}

/// The leading `python` constraint of every converted record
pub fn python_constraint(requires_python: Option<&str>) -> String {
    match requires_python.map(str::trim).filter(|r| !r.is_empty()) {
        Some(spec) => match SpecifierSet::parse(spec) {
            Ok(set) => format!("python {}", conda_specifier(&set)),
            Err(_) => {
                warn!("Unparseable Requires-Python '{}', keeping it verbatim", spec);
                format!("python {}", spec.replace(' ', ""))
            }
        },
        None => "python".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> Translator {
        Translator::new(Arc::new(NameMapping::embedded().unwrap()))
    }

    #[test]
    fn test_plain_requirements() {
        let out = translator().translate(&["requests>=2.0,<3", "Zope.Interface", "PyYAML==6.0"]);
        assert_eq!(
            out.constraints,
            vec!["requests <3,>=2.0", "zope.interface", "pyyaml ==6.0"]
        );
        assert!(out.extras.is_empty());
    }

    #[test]
    fn test_extras_never_in_main_list() {
        let out = translator().translate(&[
            "click",
            "pytest>=7; extra == 'test'",
            "coverage; extra == \"test\" or extra == 'cov'",
        ]);
        assert_eq!(out.constraints, vec!["click"]);
        assert_eq!(out.extras["test"], vec!["pytest >=7", "coverage"]);
        assert_eq!(out.extras["cov"], vec!["coverage"]);
        assert!(!out.constraints.iter().any(|c| c.starts_with("pytest")));
    }

    #[test]
    fn test_markers_without_environment_are_kept() {
        let out = translator().translate(&["tomli>=1.1; python_version < '3.11'"]);
        assert_eq!(out.constraints, vec!["tomli >=1.1"]);
    }

    #[test]
    fn test_markers_with_environment() {
        let t = translator().with_environment(MarkerEnvironment::cpython("3.12", "linux-64"));
        let out = t.translate(&[
            "tomli>=1.1; python_version < '3.11'",
            "uvloop; sys_platform != 'win32'",
            "pywin32; sys_platform == 'win32' and extra == 'windows'",
        ]);
        assert_eq!(out.constraints, vec!["uvloop"]);
        assert!(out.extras.is_empty());
    }

    #[test]
    fn test_unparseable_kept_verbatim() {
        let out = translator().translate(&["this is not ][ valid"]);
        assert_eq!(out.constraints, vec!["this is not ][ valid"]);
    }

    #[test]
    fn test_arbitrary_equality_and_url() {
        let out = translator().translate(&["foo===1.0", "bar @ https://example.com/bar.whl"]);
        assert_eq!(out.constraints, vec!["foo ==1.0", "bar"]);
    }

    #[test]
    fn test_python_constraint() {
        assert_eq!(python_constraint(None), "python");
        assert_eq!(python_constraint(Some("")), "python");
        assert_eq!(python_constraint(Some(">=3.8, <4")), "python <4,>=3.8");
    }
}
