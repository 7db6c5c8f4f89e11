//! Forward path normalization.
//!
//! Proxy routes have a static prefix (`/api/datasources/proxy/{id}`) followed
//! by a wildcard tail that is forwarded to the data source. Routers commonly
//! drop the trailing separator when capturing a wildcard, and either side of
//! the join may or may not carry a separator. [`normalize`] reconciles the two
//! into a [`ForwardPath`] with exactly one separator at the join and the
//! request's trailing separator preserved.

use std::fmt;

/// Canonical path of a proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPath {
    full: String,
    tail_start: usize,
}

impl ForwardPath {
    /// Full canonical path: prefix, one separator, tail.
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Static route prefix, without the joining separator.
    pub fn prefix(&self) -> &str {
        let end = if self.tail_start == self.full.len() {
            self.full.len()
        } else {
            self.tail_start.saturating_sub(1)
        };
        &self.full[..end]
    }

    /// Upstream-relative tail, without a leading separator.
    pub fn tail(&self) -> &str {
        &self.full[self.tail_start..]
    }
}

impl fmt::Display for ForwardPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Join the request path and wildcard tail into a canonical forward path.
///
/// `request_path` may be either the static prefix alone or the full request
/// path that already ends with the tail; a segment-aligned tail at the end of
/// `request_path` is recognised and not appended twice. This makes the
/// operation idempotent.
pub fn normalize(request_path: &str, wildcard_tail: &str) -> ForwardPath {
    let stripped = wildcard_tail.trim_start_matches('/');
    if stripped.is_empty() {
        return ForwardPath {
            full: request_path.to_string(),
            tail_start: request_path.len(),
        };
    }

    let (prefix, tail) = match strip_tail(request_path, stripped.trim_end_matches('/')) {
        // Full request path: keep its trailing separator even if the router dropped it
        Some(prefix) if request_path.ends_with('/') && !stripped.ends_with('/') => {
            (prefix, format!("{stripped}/"))
        }
        Some(prefix) => (prefix, stripped.to_string()),
        None => (request_path, stripped.to_string()),
    };
    let prefix = prefix.trim_end_matches('/');

    let mut full = String::with_capacity(prefix.len() + 1 + tail.len());
    full.push_str(prefix);
    full.push('/');
    let tail_start = full.len();
    full.push_str(&tail);

    ForwardPath { full, tail_start }
}

/// Part of `request_path` before a trailing, segment-aligned `tail_body`.
fn strip_tail<'a>(request_path: &'a str, tail_body: &str) -> Option<&'a str> {
    let body = request_path.trim_end_matches('/');
    match body.strip_suffix(tail_body) {
        Some(rest) if rest.is_empty() || rest.ends_with('/') => Some(rest),
        _ => None,
    }
}
