//! URL resolution and origin comparison helpers.

use crate::types::{AuditError, AuditResult};
use url::Url;

/// Parse an audit target. Only `http` and `https` are accepted.
pub fn parse_target(raw: &str) -> AuditResult<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| AuditError::InvalidTarget {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AuditError::UnsupportedScheme {
            url: raw.to_string(),
            scheme: other.to_string(),
        }),
    }
}

/// Resolve `reference` against `base`. Absolute references ignore the base.
pub fn resolve(reference: &str, base: &str) -> Option<Url> {
    match Url::parse(base) {
        Ok(base) => base.join(reference.trim()).ok(),
        Err(_) => Url::parse(reference.trim()).ok(),
    }
}

/// Serialized absolute form of `raw`, or `None` if it does not parse.
pub fn normalize(raw: &str) -> Option<String> {
    Url::parse(raw.trim()).ok().map(String::from)
}

pub fn is_https(url: &Url) -> bool {
    url.scheme() == "https"
}

/// Scheme, host and port comparison. Opaque origins never match.
pub fn is_cross_origin(a: &Url, b: &Url) -> bool {
    a.origin() != b.origin()
}
