//! Stable source identity derived from a form URL.
//!
//! The vendor exposes the same form under several URL shapes (editor links,
//! published `/e/` links, short links). All of them embed one opaque token
//! that survives re-shares, which makes it the de-duplication key. Known
//! shapes are matched first; anything unrecognized falls back to the longest
//! opaque path token, and finally to [`UNKNOWN_SOURCE`].

use crate::types::UNKNOWN_SOURCE;
use regex::Regex;
use url::Url;

/// Hosts that only ever serve redirects to the canonical form URL. These
/// must be resolved before deriving a source id.
const SHORT_LINK_HOSTS: &[&str] = &["forms.gle", "goo.gl"];

/// Minimum length for a path segment to count as an opaque token in the
/// fallback scan. Shorter segments are almost always route words.
const MIN_TOKEN_LEN: usize = 12;

/// Path segments that look like tokens but are route vocabulary.
const ROUTE_WORDS: &[&str] = &["viewform", "viewanalytics", "formResponse", "closedform"];

/// Whether this URL points at a redirect-only short-link host.
pub fn is_short_link(url: &Url) -> bool {
    url.host_str()
        .map(|h| SHORT_LINK_HOSTS.iter().any(|s| h.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

/// Derive the stable source id from a (resolved) form URL.
///
/// Tried in order, first match wins:
/// 1. published-form shape `/forms/d/e/<token>`
/// 2. editor shape `/forms/d/<token>`
/// 3. bare `/e/<token>` shape used by older embeds
/// 4. longest opaque path token (length ≥ 12, `[A-Za-z0-9_-]`)
///
/// Returns [`UNKNOWN_SOURCE`] when nothing qualifies.
pub fn derive_source_id(url: &Url) -> String {
    let path = url.path();

    let known_shapes = [
        r"/forms/d/e/([A-Za-z0-9_-]{12,})",
        r"/forms/d/([A-Za-z0-9_-]{12,})",
        r"^/e/([A-Za-z0-9_-]{12,})",
    ];
    for shape in known_shapes {
        let re = Regex::new(shape).expect("source id shape is valid");
        if let Some(caps) = re.captures(path) {
            if let Some(token) = caps.get(1) {
                return token.as_str().to_string();
            }
        }
    }

    // Fallback: the longest opaque segment anywhere in the path.
    let token_re = Regex::new(r"^[A-Za-z0-9_-]+$").expect("token regex is valid");
    path.split('/')
        .filter(|seg| seg.len() >= MIN_TOKEN_LEN)
        .filter(|seg| !ROUTE_WORDS.contains(seg))
        .filter(|seg| token_re.is_match(seg))
        .max_by_key(|seg| seg.len())
        .map(|seg| seg.to_string())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}
