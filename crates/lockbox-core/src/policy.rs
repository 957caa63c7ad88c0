//! Access control policies for Lockbox.
//!
//! Secret addresses are slash-separated paths; policy rules attach a set of
//! capabilities (`read`, `write`, `list`, `delete`) for one identity to a
//! path pattern. Pattern matching is a two-tier glob:
//!
//! - `*` matches within a single segment (never crosses `/`).
//! - `**` matches across segments, and the bare pattern `**` matches every
//!   path including the empty one.
//!
//! Evaluation is existential with default deny: access is granted iff some
//! rule for the identity carries the capability and its pattern matches.
//! There is no precedence, no explicit deny, and no inheritance.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

#[allow(clippy::expect_used)]
static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+(?:/[A-Za-z0-9_-]+)*$").expect("path grammar regex is valid")
});

/// An access capability from the closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Retrieve secret values.
    Read,
    /// Store new secrets and new versions of existing ones.
    Write,
    /// Enumerate secret paths under a prefix.
    List,
    /// Remove secrets.
    Delete,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::List => "list",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

impl FromStr for Capability {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "list" => Ok(Self::List),
            "delete" => Ok(Self::Delete),
            other => Err(VaultError::InvalidCapability {
                name: other.to_owned(),
            }),
        }
    }
}

/// A single access rule: one identity, one pattern, a set of capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// The identity the rule applies to. Trusted caller-declared input.
    pub identity: String,
    /// Path pattern, possibly containing `*` and `**` wildcards.
    pub path_pattern: String,
    /// Capabilities this rule grants on matching paths.
    pub capabilities: Vec<Capability>,
}

/// Validate a secret path against the path grammar.
///
/// One or more non-empty segments of `[A-Za-z0-9_-]` separated by `/`, with
/// no leading, trailing, or consecutive separators. Patterns are NOT
/// validated with this — wildcards are legal only in patterns.
#[must_use]
pub fn validate_path(path: &str) -> bool {
    PATH_RE.is_match(path)
}

/// Match a path against a policy pattern.
///
/// The pattern is compiled to an anchored regular expression: literal runs
/// are escaped, each single `*` becomes a non-slash repeat, and each `**`
/// becomes an unrestricted repeat. A plain glob matcher whose `*` crosses
/// `/` would get single-segment rules wrong, hence the explicit compile.
#[must_use]
pub fn match_path_pattern(pattern: &str, path: &str) -> bool {
    // Bare "**" matches everything, including the empty prefix used by
    // unscoped list operations.
    if pattern == "**" {
        return true;
    }

    let parts: Vec<String> = pattern
        .split("**")
        .map(|part| {
            part.split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("[^/]*")
        })
        .collect();
    let anchored = format!("^{}$", parts.join(".*"));

    // Every metacharacter in the input was escaped above, so this compile
    // cannot fail on user input; treat a failure as a non-match.
    Regex::new(&anchored).map_or(false, |re| re.is_match(path))
}

/// Decide whether `identity` holds `capability` on `path`.
///
/// Existential over the rule sequence, default deny.
#[must_use]
pub fn check_access(
    policies: &[PolicyRule],
    identity: &str,
    path: &str,
    capability: Capability,
) -> bool {
    policies.iter().any(|rule| {
        rule.identity == identity
            && rule.capabilities.contains(&capability)
            && match_path_pattern(&rule.path_pattern, path)
    })
}
