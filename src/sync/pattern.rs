//! Glob matching over forward-slash relative paths.
//!
//! The vocabulary is basic glob (`*`, `?`, bracket classes; `*` does not
//! cross `/`) extended with four `**` forms:
//!
//! - `prefix/**`: any path equal to `prefix` or under `prefix/`
//! - `**/suffix`: any path equal to `suffix` or ending in `/suffix`
//! - `prefix/**/suffix`: both of the above conditions together
//! - `**`: every path
//!
//! A `**` in any other position is handed to the glob engine unchanged.
//! Malformed patterns silently match nothing; `validate_pattern` surfaces
//! them when a caller explicitly asks.

use glob::{MatchOptions, Pattern};

use super::{Change, SyncError};

fn glob_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

fn prefix_holds(path: &str, prefix: &str) -> bool {
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

fn suffix_holds(path: &str, suffix: &str) -> bool {
    path == suffix || path.ends_with(&format!("/{}", suffix))
}

/// Match one relative path against one pattern.
pub fn matches_pattern(path: &str, pattern: &str) -> bool {
    if pattern == "**" {
        return true;
    }

    if let Some(idx) = pattern.find("/**/") {
        let prefix = &pattern[..idx];
        let suffix = &pattern[idx + 4..];
        return prefix_holds(path, prefix) && suffix_holds(path, suffix);
    }

    if let Some(prefix) = pattern.strip_suffix("/**") {
        return prefix_holds(path, prefix);
    }

    if let Some(suffix) = pattern.strip_prefix("**/") {
        return suffix_holds(path, suffix);
    }

    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(path, glob_options()),
        Err(_) => false,
    }
}

/// True when the path satisfies at least one pattern. An empty set keeps
/// every path.
pub fn matches_any(path: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|p| matches_pattern(path, p))
}

/// Explicit validation for user-supplied patterns. Matching itself never
/// fails; this is the only place a malformed pattern surfaces.
pub fn validate_pattern(pattern: &str) -> Result<(), SyncError> {
    if pattern == "**"
        || pattern.find("/**/").is_some()
        || pattern.ends_with("/**")
        || pattern.starts_with("**/")
    {
        return Ok(());
    }
    Pattern::new(pattern)
        .map(|_| ())
        .map_err(|e| SyncError::Pattern(format!("{}: {}", pattern, e)))
}

/// Keep the changes whose path satisfies the filter set.
pub fn filter_changes(changes: Vec<Change>, patterns: &[String]) -> Vec<Change> {
    changes
        .into_iter()
        .filter(|c| matches_any(&c.path, patterns))
        .collect()
}
