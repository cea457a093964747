//! Identifier sanitization for metric and label names
//!
//! Metric and label names end up as table and column names, so anything
//! outside `[A-Za-z0-9_]` is removed before they reach SQL text.

use std::sync::LazyLock;

use regex::Regex;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("static pattern is valid"));

/// Remove every character that is not an ASCII letter, digit or underscore.
///
/// An empty result means the input cannot be used as an identifier.
pub fn sanitize(name: &str) -> String {
    UNSAFE_CHARS.replace_all(name, "").into_owned()
}

/// Whether a sanitized identifier can be used in SQL.
pub fn is_usable(identifier: &str) -> bool {
    !identifier.is_empty()
}
