// src/requirement.rs

//! PEP 508 dependency strings
//!
//! Parses `name[extra1,extra2] (>=1.0,<2) ; python_version < "3.11"` and
//! `name @ https://...` forms into a [`Requirement`]. Environment markers are
//! kept as an expression tree so they can be inspected (which extras guard a
//! dependency) and evaluated against a target [`MarkerEnvironment`].

use crate::mapping::canonicalize_name;
use crate::version::{Operator, Specifier, SpecifierSet, Version};
use std::fmt;

/// Requirement parse error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid requirement '{input}': {reason}")]
pub struct RequirementError {
    pub input: String,
    pub reason: String,
}

impl RequirementError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed dependency declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub specifier: SpecifierSet,
    pub url: Option<String>,
    pub marker: Option<MarkerTree>,
}

impl Requirement {
    pub fn parse(input: &str) -> Result<Self, RequirementError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RequirementError::new(input, "empty requirement"));
        }

        let name_end = trimmed
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(trimmed.len());
        let name = &trimmed[..name_end];
        if name.is_empty()
            || !name.starts_with(|c: char| c.is_ascii_alphanumeric())
            || !name.ends_with(|c: char| c.is_ascii_alphanumeric())
        {
            return Err(RequirementError::new(input, "missing or malformed project name"));
        }

        let mut rest = trimmed[name_end..].trim_start();

        let mut extras = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let close = after
                .find(']')
                .ok_or_else(|| RequirementError::new(input, "unclosed extras bracket"))?;
            for extra in after[..close].split(',').map(str::trim).filter(|e| !e.is_empty()) {
                extras.push(canonicalize_name(extra));
            }
            rest = after[close + 1..].trim_start();
        }

        let (url, spec_text, marker_text) = if let Some(after_at) = rest.strip_prefix('@') {
            let after_at = after_at.trim_start();
            // A URL may contain ';', so its marker needs whitespace before ';'
            let (url, marker) = match after_at.find(" ;") {
                Some(idx) => (&after_at[..idx], Some(&after_at[idx + 2..])),
                None => (after_at, None),
            };
            let url = url.trim();
            if url.is_empty() {
                return Err(RequirementError::new(input, "empty URL after '@'"));
            }
            (Some(url.to_string()), "", marker)
        } else {
            match rest.split_once(';') {
                Some((spec, marker)) => (None, spec, Some(marker)),
                None => (None, rest, None),
            }
        };

        let spec_text = spec_text.trim();
        let spec_text = match spec_text.strip_prefix('(') {
            Some(inner) => inner
                .strip_suffix(')')
                .ok_or_else(|| RequirementError::new(input, "unbalanced parentheses"))?,
            None => spec_text,
        };
        let specifier = SpecifierSet::parse(spec_text)
            .map_err(|e| RequirementError::new(input, e.to_string()))?;

        let marker = match marker_text.map(str::trim) {
            Some("") => return Err(RequirementError::new(input, "empty marker after ';'")),
            Some(text) => Some(
                MarkerTree::parse(text).map_err(|reason| RequirementError::new(input, reason))?,
            ),
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            extras,
            specifier,
            url,
            marker,
        })
    }

    /// Extras whose activation pulls in this dependency
    pub fn extra_names(&self) -> Vec<String> {
        self.marker
            .as_ref()
            .map(MarkerTree::extra_names)
            .unwrap_or_default()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        if let Some(url) = &self.url {
            write!(f, " @ {url}")?;
            if self.marker.is_some() {
                write!(f, " ")?;
            }
        } else {
            write!(f, "{}", self.specifier)?;
        }
        if let Some(marker) = &self.marker {
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}

/// Values a marker expression can be evaluated against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEnvironment {
    pub implementation_name: String,
    pub implementation_version: String,
    pub os_name: String,
    pub platform_machine: String,
    pub platform_python_implementation: String,
    pub platform_release: String,
    pub platform_system: String,
    pub platform_version: String,
    pub python_full_version: String,
    pub python_version: String,
    pub sys_platform: String,
}

impl MarkerEnvironment {
    /// A CPython interpreter of the given `major.minor` on a conda subdir
    pub fn cpython(python_version: &str, subdir: &str) -> Self {
        let (os_name, sys_platform, platform_system) = match subdir.split('-').next() {
            Some("win") => ("nt", "win32", "Windows"),
            Some("osx") => ("posix", "darwin", "Darwin"),
            _ => ("posix", "linux", "Linux"),
        };
        let platform_machine = match subdir.split('-').nth(1) {
            Some("64") if os_name == "nt" => "AMD64",
            Some("64") => "x86_64",
            Some("aarch64") => "aarch64",
            Some("arm64") => "arm64",
            Some("ppc64le") => "ppc64le",
            Some("32") => "i686",
            _ => "",
        };
        let full = if python_version.matches('.').count() >= 2 {
            python_version.to_string()
        } else {
            format!("{python_version}.0")
        };
        let short = full.splitn(3, '.').take(2).collect::<Vec<_>>().join(".");

        Self {
            implementation_name: "cpython".to_string(),
            implementation_version: full.clone(),
            os_name: os_name.to_string(),
            platform_machine: platform_machine.to_string(),
            platform_python_implementation: "CPython".to_string(),
            platform_release: String::new(),
            platform_system: platform_system.to_string(),
            platform_version: String::new(),
            python_full_version: full,
            python_version: short,
            sys_platform: sys_platform.to_string(),
        }
    }

    fn get(&self, variable: &str) -> Option<&str> {
        let value = match variable {
            "implementation_name" => &self.implementation_name,
            "implementation_version" => &self.implementation_version,
            "os_name" | "os.name" => &self.os_name,
            "platform_machine" | "platform.machine" => &self.platform_machine,
            "platform_python_implementation" | "platform.python_implementation" => {
                &self.platform_python_implementation
            }
            "platform_release" | "platform.release" => &self.platform_release,
            "platform_system" => &self.platform_system,
            "platform_version" | "platform.version" => &self.platform_version,
            "python_full_version" => &self.python_full_version,
            "python_version" => &self.python_version,
            "sys_platform" | "sys.platform" => &self.sys_platform,
            _ => return None,
        };
        Some(value)
    }
}

/// Comparison operator inside a marker expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOp {
    Version(Operator),
    In,
    NotIn,
}

impl fmt::Display for MarkerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version(op) => write!(f, "{}", op.as_str()),
            Self::In => write!(f, "in"),
            Self::NotIn => write!(f, "not in"),
        }
    }
}

/// Operand of a marker comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerValue {
    Variable(String),
    Literal(String),
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(name) => write!(f, "{name}"),
            Self::Literal(value) => write!(f, "\"{value}\""),
        }
    }
}

/// Marker expression tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerTree {
    Compare {
        lhs: MarkerValue,
        op: MarkerOp,
        rhs: MarkerValue,
    },
    And(Vec<MarkerTree>),
    Or(Vec<MarkerTree>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Op(MarkerOp),
    Variable(String),
    Literal(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| "unterminated string in marker".to_string())?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + close].iter().collect()));
                i += close + 2;
            }
            '=' | '!' | '<' | '>' | '~' => {
                let mut end = i;
                while end < chars.len() && matches!(chars[end], '=' | '!' | '<' | '>' | '~') {
                    end += 1;
                }
                let op_text: String = chars[i..end].iter().collect();
                let op = match op_text.as_str() {
                    "===" => Operator::Arbitrary,
                    "==" => Operator::Equal,
                    "!=" => Operator::NotEqual,
                    "<=" => Operator::LessEqual,
                    ">=" => Operator::GreaterEqual,
                    "<" => Operator::Less,
                    ">" => Operator::Greater,
                    "~=" => Operator::Compatible,
                    other => return Err(format!("unknown marker operator '{other}'")),
                };
                tokens.push(Token::Op(MarkerOp::Version(op)));
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = i;
                while end < chars.len()
                    && (chars[end].is_ascii_alphanumeric() || matches!(chars[end], '_' | '.'))
                {
                    end += 1;
                }
                let word: String = chars[i..end].iter().collect();
                match word.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "in" => tokens.push(Token::Op(MarkerOp::In)),
                    "not" => {
                        // `not` only appears as part of `not in`
                        let mut next = end;
                        while next < chars.len() && chars[next].is_whitespace() {
                            next += 1;
                        }
                        if chars.get(next) == Some(&'i') && chars.get(next + 1) == Some(&'n') {
                            tokens.push(Token::Op(MarkerOp::NotIn));
                            i = next + 2;
                            continue;
                        }
                        return Err("expected 'in' after 'not'".to_string());
                    }
                    _ => tokens.push(Token::Variable(word)),
                }
                i = end;
            }
            other => return Err(format!("unexpected character '{other}' in marker")),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or_expr(&mut self) -> Result<MarkerTree, String> {
        let mut items = vec![self.and_expr()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            items.push(self.and_expr()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            MarkerTree::Or(items)
        })
    }

    fn and_expr(&mut self) -> Result<MarkerTree, String> {
        let mut items = vec![self.atom()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            items.push(self.atom()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            MarkerTree::And(items)
        })
    }

    fn atom(&mut self) -> Result<MarkerTree, String> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.or_expr()?;
            return match self.next() {
                Some(Token::RParen) => Ok(inner),
                _ => Err("expected ')' in marker".to_string()),
            };
        }
        let lhs = self.value()?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            _ => return Err("expected comparison operator in marker".to_string()),
        };
        let rhs = self.value()?;
        Ok(MarkerTree::Compare { lhs, op, rhs })
    }

    fn value(&mut self) -> Result<MarkerValue, String> {
        match self.next() {
            Some(Token::Variable(name)) => Ok(MarkerValue::Variable(name)),
            Some(Token::Literal(value)) => Ok(MarkerValue::Literal(value)),
            _ => Err("expected marker variable or quoted string".to_string()),
        }
    }
}

const VERSION_VARIABLES: [&str; 3] =
    ["python_version", "python_full_version", "implementation_version"];

impl MarkerTree {
    pub fn parse(text: &str) -> Result<Self, String> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let tree = parser.or_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err("trailing tokens in marker".to_string());
        }
        Ok(tree)
    }

    /// Every value compared for equality against the `extra` variable
    pub fn extra_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_extras(&mut names);
        names
    }

    fn collect_extras(&self, names: &mut Vec<String>) {
        match self {
            Self::Compare { lhs, op, rhs } => {
                if *op != MarkerOp::Version(Operator::Equal) {
                    return;
                }
                let value = match (lhs, rhs) {
                    (MarkerValue::Variable(var), MarkerValue::Literal(value))
                    | (MarkerValue::Literal(value), MarkerValue::Variable(var))
                        if var == "extra" =>
                    {
                        value
                    }
                    _ => return,
                };
                let name = canonicalize_name(value);
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            Self::And(items) | Self::Or(items) => {
                for item in items {
                    item.collect_extras(names);
                }
            }
        }
    }

    /// Evaluate against an environment, with `extra` bound to the given name
    /// (or the empty string when no extra is active)
    pub fn evaluate(&self, env: &MarkerEnvironment, extra: Option<&str>) -> bool {
        match self {
            Self::And(items) => items.iter().all(|item| item.evaluate(env, extra)),
            Self::Or(items) => items.iter().any(|item| item.evaluate(env, extra)),
            Self::Compare { lhs, op, rhs } => {
                let is_extra = [lhs, rhs]
                    .iter()
                    .any(|v| matches!(v, MarkerValue::Variable(name) if name == "extra"));
                let is_version = [lhs, rhs].iter().any(|v| {
                    matches!(v, MarkerValue::Variable(name) if VERSION_VARIABLES.contains(&name.as_str()))
                });
                let resolve = |value: &MarkerValue| -> String {
                    match value {
                        MarkerValue::Literal(s) => s.clone(),
                        MarkerValue::Variable(name) if name == "extra" => {
                            extra.unwrap_or_default().to_string()
                        }
                        MarkerValue::Variable(name) => {
                            env.get(name).unwrap_or_default().to_string()
                        }
                    }
                };
                let (mut left, mut right) = (resolve(lhs), resolve(rhs));
                if is_extra {
                    left = canonicalize_name(&left);
                    right = canonicalize_name(&right);
                }
                compare(&left, *op, &right, is_version)
            }
        }
    }
}

fn compare(left: &str, op: MarkerOp, right: &str, is_version: bool) -> bool {
    match op {
        MarkerOp::In => right.contains(left),
        MarkerOp::NotIn => !right.contains(left),
        MarkerOp::Version(operator) => {
            if is_version
                && let (Ok(candidate), Ok(spec)) = (
                    Version::parse(left),
                    Specifier::parse(&format!("{}{}", operator.as_str(), right)),
                )
            {
                return spec.contains(&candidate);
            }
            match operator {
                Operator::Equal | Operator::Arbitrary => left == right,
                Operator::NotEqual => left != right,
                Operator::Less => left < right,
                Operator::LessEqual => left <= right,
                Operator::Greater => left > right,
                Operator::GreaterEqual => left >= right,
                Operator::Compatible => false,
            }
        }
    }
}

impl fmt::Display for MarkerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { lhs, op, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Self::And(items) | Self::Or(items) => {
                let joiner = if matches!(self, Self::And(_)) { " and " } else { " or " };
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        Self::Compare { .. } => item.to_string(),
                        _ => format!("({item})"),
                    })
                    .collect();
                write!(f, "{}", parts.join(joiner))
            }
        }
    }
}
