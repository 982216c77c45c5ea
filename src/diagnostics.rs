// src/diagnostics.rs

//! Package names from solver unsatisfiability text
//!
//! Solvers phrase "this package does not exist" in free text. Every matching
//! strategy lives here so the convergence engine only sees a list of names.

use crate::spec::PackageSpec;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static NOTHING_PROVIDES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"nothing provides (?:requested )?(.*?) needed by").expect("valid regex")
});

static NOTHING_PROVIDES_REQUESTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"nothing provides requested (\S+)").expect("valid regex")
});

/// Names of packages the solver said nothing provides
///
/// Each match is a MatchSpec fragment such as `foo >=1.0`; only the name is
/// kept. Returns an empty list when the text matches nothing, which the
/// engine treats as no progress.
pub fn missing_from_unsatisfiable(diagnostic: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for re in [&*NOTHING_PROVIDES, &*NOTHING_PROVIDES_REQUESTED] {
        for captures in re.captures_iter(diagnostic) {
            if let Some(name) = captures.get(1).and_then(|m| spec_name(m.as_str())) {
                names.insert(name);
            }
        }
    }
    names.into_iter().collect()
}

fn spec_name(fragment: &str) -> Option<String> {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return None;
    }
    PackageSpec::parse(fragment).ok().map(|spec| spec.name).or_else(|| {
        fragment
            .split(|c: char| c.is_whitespace() || "=<>!~[".contains(c))
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_libmamba_style() {
        let text = "Could not solve for environment specs\n\
            The following packages are incompatible\n\
            ├─ app 1.0 is installable and it requires\n\
            │  └─ demo-package >=0.1 , which does not exist\n\
            - nothing provides demo-package >=0.1 needed by app-1.0-py_0\n\
            - nothing provides zope.interface needed by twisted-23.1-pyhd8ed1ab_0";
        assert_eq!(
            missing_from_unsatisfiable(text),
            vec!["demo-package".to_string(), "zope.interface".to_string()]
        );
    }

    #[test]
    fn test_requested() {
        let text = "Problem: nothing provides requested ach 0.2";
        assert_eq!(missing_from_unsatisfiable(text), vec!["ach".to_string()]);
    }

    #[test]
    fn test_no_match_is_empty() {
        assert!(missing_from_unsatisfiable("package foo conflicts with bar").is_empty());
        assert!(missing_from_unsatisfiable("").is_empty());
    }
}
