//! Text normalization and signatures
//!
//! Paths and messages carry request-specific noise (ids, timestamps, client
//! addresses). The functions here replace that noise with placeholder tokens so
//! that two occurrences of the same logical error produce the same signature.

use regex::Regex;
use std::sync::LazyLock;

/// Placeholder for id-like path segments and long numbers in messages
pub const ID_TOKEN: &str = "{id}";

/// Upper bound on the length of a message pattern, in characters
pub const MAX_PATTERN_CHARS: usize = 500;

/// Path used for database errors that carry no request path
pub const DATABASE_PATH: &str = "/database";

/// Path used when nothing better can be recovered
pub const UNKNOWN_PATH: &str = "/unknown";

#[allow(clippy::expect_used)]
static RE_UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_ISO_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
        .expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("valid regex")
});
#[allow(clippy::expect_used)]
static RE_LONG_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{5,}\b").expect("valid regex"));
#[allow(clippy::expect_used)]
static RE_FUNCTION_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/functions/v1/[A-Za-z0-9_-]+").expect("valid regex"));

/// Normalize a request path
///
/// Drops the query string and fragment, then replaces UUID-shaped and purely
/// numeric segments with `{id}`:
///
/// ```
/// use logaudit::aggregator::normalize_path;
///
/// assert_eq!(
///     normalize_path("/orders/3819/items/550e8400-e29b-41d4-a716-446655440000?x=1"),
///     "/orders/{id}/items/{id}"
/// );
/// ```
///
/// The output is a fixed point: normalizing it again returns it unchanged.
pub fn normalize_path(path: &str) -> String {
    let without_query = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    without_query
        .split('/')
        .map(|segment| {
            let numeric = !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit());
            if numeric || RE_UUID_SEGMENT.is_match(segment) {
                ID_TOKEN
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Reduce an error message to a comparable pattern
///
/// Replaces UUIDs, ISO-8601 timestamps, IPv4 addresses and numbers of five or
/// more digits with placeholder tokens, then truncates to
/// [`MAX_PATTERN_CHARS`] characters.
pub fn extract_pattern(message: &str) -> String {
    let pattern = RE_UUID.replace_all(message.trim(), "{uuid}");
    let pattern = RE_ISO_TIMESTAMP.replace_all(&pattern, "{timestamp}");
    let pattern = RE_IPV4.replace_all(&pattern, "{ip}");
    let pattern = RE_LONG_NUMBER.replace_all(&pattern, ID_TOKEN);

    truncate_chars(&pattern, MAX_PATTERN_CHARS)
}

/// Recover an edge function path (`/functions/v1/<name>`) from free text
pub fn function_path_from_message(message: &str) -> Option<String> {
    RE_FUNCTION_PATH
        .find(message)
        .map(|m| m.as_str().to_string())
}

/// Path component of an absolute or relative URL
pub fn path_from_url(url: &str) -> Option<String> {
    let rest = match url.find("://") {
        Some(idx) => {
            let after_scheme = &url[idx + 3..];
            match after_scheme.find('/') {
                Some(slash) => &after_scheme[slash..],
                None => return None,
            }
        }
        None if url.starts_with('/') => url,
        None => return None,
    };
    let path = rest.split(['?', '#']).next().unwrap_or_default();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Stable signature for a normalized error tuple
///
/// A 32-bit rolling hash (`h = h * 31 + c`, wrapping) over
/// `path|method|status|pattern`, rendered as eight lowercase hex digits.
pub fn signature(path: &str, method: &str, status_code: u16, pattern: &str) -> String {
    let key = format!("{}|{}|{}|{}", path, method, status_code, pattern);
    let hash = key
        .chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32));
    format!("{:08x}", hash)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
