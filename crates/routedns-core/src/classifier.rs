//! Route classification
//!
//! Pure functions deciding, for each discovered route:
//! - which [`Zone`] it belongs to ([`detect_zone`])
//! - whether its domain is excluded from sync ([`is_excluded`])
//!
//! ## Exclusion Pattern Syntax
//!
//! | Form                 | Kind       | Example                        |
//! |----------------------|------------|--------------------------------|
//! | plain domain         | exact      | `auth.example.com`             |
//! | contains `*` or `?`  | shell glob | `*.internal.*`, `dev-?.lan`    |
//! | leading `~`          | regex      | `~^staging-\d+\.example\.com$` |
//!
//! All forms match case-insensitively.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Marks a regex exclusion pattern
pub const REGEX_SENTINEL: char = '~';

static ZONE_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"-(internal|external)(?:@|$)")
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| unreachable!("zone suffix regex is valid: {e}"))
});

/// DNS zone classification of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    /// Resolved by the local DNS provider; synced
    #[default]
    Internal,
    /// Resolved upstream; never synced
    External,
}

impl std::str::FromStr for Zone {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "internal" => Ok(Zone::Internal),
            "external" => Ok(Zone::External),
            other => Err(crate::Error::config(format!(
                "Invalid zone '{}'. Supported zones: internal, external",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Zone::Internal => f.write_str("internal"),
            Zone::External => f.write_str("external"),
        }
    }
}

/// Detect the zone of a route from its identifying name
///
/// A `-internal` / `-external` suffix, optionally followed by `@provider`
/// (`app-external@docker`), decides. Otherwise `default_zone` applies.
pub fn detect_zone(route_name: &str, default_zone: Zone) -> Zone {
    match ZONE_SUFFIX_RE.captures(route_name) {
        Some(caps) if caps[1].eq_ignore_ascii_case("external") => Zone::External,
        Some(_) => Zone::Internal,
        None => default_zone,
    }
}

/// A compiled domain exclusion pattern
#[derive(Debug, Clone)]
pub enum ExclusionPattern {
    /// Case-insensitive exact domain
    Exact(String),
    /// Shell glob (`*`, `?`), kept with its source text
    Wildcard {
        /// Pattern as configured
        glob: String,
        /// Anchored, case-insensitive translation
        regex: Regex,
    },
    /// Case-insensitive regular expression, searched anywhere in the domain
    Regex(Regex),
}

impl ExclusionPattern {
    /// Parse one configured pattern
    ///
    /// Returns an error for an invalid regex; callers decide whether to skip it.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(crate::Error::invalid_input("empty exclusion pattern"));
        }

        if let Some(expr) = raw.strip_prefix(REGEX_SENTINEL) {
            let regex = RegexBuilder::new(expr)
                .case_insensitive(true)
                .build()
                .map_err(|e| crate::Error::invalid_input(format!("invalid regex '{}': {}", expr, e)))?;
            return Ok(Self::Regex(regex));
        }

        if raw.contains('*') || raw.contains('?') {
            return Ok(Self::Wildcard {
                glob: raw.to_string(),
                regex: glob_to_regex(raw)?,
            });
        }

        Ok(Self::Exact(raw.to_ascii_lowercase()))
    }

    /// Whether `domain` matches this pattern
    pub fn matches(&self, domain: &str) -> bool {
        match self {
            Self::Exact(expected) => domain.eq_ignore_ascii_case(expected),
            Self::Wildcard { regex, .. } | Self::Regex(regex) => regex.is_match(domain),
        }
    }
}

/// Compile configured patterns, skipping malformed ones with a warning
pub fn compile_patterns<I, S>(raw: I) -> Vec<ExclusionPattern>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut patterns = Vec::new();
    for item in raw {
        let item = item.as_ref().trim();
        if item.is_empty() {
            continue;
        }
        match ExclusionPattern::parse(item) {
            Ok(pattern) => {
                debug!("Added exclusion pattern: {}", item);
                patterns.push(pattern);
            }
            Err(e) => warn!("Skipping invalid exclusion pattern '{}': {}", item, e),
        }
    }
    patterns
}

/// Whether `domain` matches any of `patterns`
pub fn is_excluded(domain: &str, patterns: &[ExclusionPattern]) -> bool {
    patterns.iter().any(|p| p.matches(domain))
}

/// Case-insensitive shell-glob match of `name` against `pattern`
///
/// An invalid pattern matches nothing.
pub fn glob_matches(pattern: &str, name: &str) -> bool {
    match glob_to_regex(pattern) {
        Ok(regex) => regex.is_match(name),
        Err(e) => {
            warn!("Invalid glob pattern '{}': {}", pattern, e);
            false
        }
    }
}

fn glob_to_regex(glob: &str) -> crate::Result<Regex> {
    let mut expr = String::with_capacity(glob.len() + 8);
    expr.push('^');
    for c in glob.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    RegexBuilder::new(&expr)
        .case_insensitive(true)
        .build()
        .map_err(|e| crate::Error::invalid_input(format!("invalid glob '{}': {}", glob, e)))
}
