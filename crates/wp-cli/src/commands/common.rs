//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use wp_core::Version;

/// Parse an optional version given on the command line.
pub(crate) fn parse_bound(value: Option<&str>, flag: &str) -> Result<Option<Version>> {
    value
        .map(|v| Version::parse(v).with_context(|| format!("Invalid {flag} version")))
        .transpose()
}

/// `1 migration` / `3 migrations`
pub(crate) fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}
