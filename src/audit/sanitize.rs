//! Free-text scrubbing for audit records.
//!
//! Long strings are truncated and anything that looks like a credential is
//! masked before it reaches the security log. Only free-text fields go through
//! here; timestamps, event types and identifiers are written as-is.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum number of characters kept from a free-text field.
pub const MAX_FIELD_CHARS: usize = 200;

/// Appended to a field that was cut at [`MAX_FIELD_CHARS`].
pub const TRUNCATION_MARKER: &str = "...";

/// Replaces every secret-looking run.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// JWT-like blobs, long hex runs, long base64 runs.
static SECRET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(eyJ[A-Za-z0-9_-]{20,}|[A-Fa-f0-9]{32,}|[A-Za-z0-9+/]{32,}={0,2})")
        .expect("static regex")
});

/// Truncate to [`MAX_FIELD_CHARS`] then mask secret-looking substrings.
#[must_use]
pub fn sanitize(input: &str) -> String {
    let truncated = match input.char_indices().nth(MAX_FIELD_CHARS) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &input[..cut]),
        None => input.to_string(),
    };

    SECRET_PATTERN
        .replace_all(&truncated, REDACTION_MARKER)
        .into_owned()
}
