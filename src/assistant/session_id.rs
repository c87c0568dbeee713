//! Extraction of the assistant's own session identifier from its output.
//!
//! The assistant prints a line such as `Session ID: 3f2a-...` near the end of
//! a run. Output is scanned top to bottom and the first match wins, so an
//! identifier echoed back later in the transcript never overrides the one
//! the assistant reported first.

use std::sync::LazyLock;

use regex::Regex;

/// Label is case-insensitive; the token is lowercase hex and hyphens only.
const SESSION_ID_PATTERN: &str = r"(?i:session id):[ \t]*([0-9a-f-]+)";

static SESSION_ID_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(SESSION_ID_PATTERN).ok());

/// Return the first `Session ID: <token>` token in `text`, if any.
#[must_use]
pub fn extract_session_id(text: &str) -> Option<String> {
    let re = SESSION_ID_RE.as_ref()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|token| token.as_str().to_owned())
}
