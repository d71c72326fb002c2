//! Header value helpers.
//!
//! Header values are byte sequences; comparisons are ASCII
//! case-insensitive and ignore surrounding whitespace.

use http::header::{CONNECTION, TRANSFER_ENCODING};
use http::{HeaderMap, Version};

/// Split a comma-separated header value into trimmed, non-empty tokens.
pub fn tokens(val: &[u8]) -> impl Iterator<Item = &[u8]> {
    val.split(|&b| b == b',')
        .map(|token| token.trim_ascii())
        .filter(|token| !token.is_empty())
}

/// Whether a `Connection` value contains the `close` token.
pub fn is_close(val: &[u8]) -> bool {
    tokens(val).any(|t| t.eq_ignore_ascii_case(b"close"))
}

/// Whether a `Connection` value contains the `keep-alive` token.
pub fn is_keep_alive(val: &[u8]) -> bool {
    tokens(val).any(|t| t.eq_ignore_ascii_case(b"keep-alive"))
}

/// Whether a `Transfer-Encoding` value ends with `chunked`.
pub fn is_chunked(val: &[u8]) -> bool {
    tokens(val)
        .last()
        .is_some_and(|t| t.eq_ignore_ascii_case(b"chunked"))
}

/// Decide persistence from a message version and its `Connection` values.
///
/// `close` always wins. Otherwise HTTP/1.1 persists by default and
/// HTTP/1.0 only with an explicit `keep-alive`.
pub fn keep_alive<'a>(version: Version, connection: impl IntoIterator<Item = &'a [u8]>) -> bool {
    let mut explicit = false;
    for val in connection {
        if is_close(val) {
            return false;
        }
        explicit |= is_keep_alive(val);
    }
    version == Version::HTTP_11 || explicit
}

/// Persistence of a parsed response.
pub fn response_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    keep_alive(
        version,
        headers.get_all(CONNECTION).iter().map(|v| v.as_bytes()),
    )
}

/// Whether a parsed response uses chunked transfer coding.
///
/// Multiple `Transfer-Encoding` fields are treated as one joined list.
pub fn response_is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .last()
        .is_some_and(|v| is_chunked(v.as_bytes()))
}
