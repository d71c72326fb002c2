//! Message heads on the wire.
//!
//! # Responsibilities
//! - Serialize an outbound request head and refuse anything that would not
//!   read back as exactly the lines that were written
//! - Locate the end of an inbound response head (`\r\n\r\n` or `\n\n`)
//! - Parse the response status line and header fields
//!
//! # Design Decisions
//! - Validation runs on the assembled text, so header injection through
//!   names or values is caught no matter which field carries it
//! - Bare `\n` line endings are accepted in responses


use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::client::RequestHead;
use crate::error::{Error, Result};

/// Upper bound on header fields accepted in a response head.
pub const MAX_HEADERS: usize = 100;

const INVALID_HEADERS: &str = "unable to send request with invalid request headers";

static REQUEST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)\A\S+ \S+ HTTP/1\.[01]\r\n").expect("request line pattern is valid")
});

static HEADER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m-u)^[^()<>@,;:\\"/\[\]?={}\x00-\x20\x7F]+:[\x20\x09]*(?:[\x20\x09]*[\x21-\x7E\x80-\xFF]+)*[\x20\x09]*\r?\n"#,
    )
    .expect("header line pattern is valid")
});

/// Reason phrase of a response, stored as a response extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(pub String);

impl ReasonPhrase {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parsed response status line and headers.
#[derive(Debug)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub reason: ReasonPhrase,
    pub headers: HeaderMap,
}

/// Serialize a request head, terminated by the empty line.
///
/// Fails with an invalid-argument error when the request line is malformed
/// or the header block does not consist of exactly one well-formed line per
/// header (for example a name containing `:` or a value carrying a line
/// break).
pub fn encode_request_head(head: &RequestHead) -> Result<Vec<u8>> {
    let version = match head.version() {
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        other => {
            return Err(Error::invalid(format!(
                "unable to send request with unsupported version {:?}",
                other
            )))
        }
    };

    let mut text = String::with_capacity(128);
    text.push_str(&format!("{} {} HTTP/{}\r\n", head.method(), head.target(), version));

    let mut expected = 0usize;
    for (name, value) in head.headers() {
        if name.contains(':') {
            return Err(Error::invalid(INVALID_HEADERS));
        }
        text.push_str(&format!("{}: {}\r\n", name, value));
        expected += 1;
    }

    let bytes = text.into_bytes();
    if !REQUEST_LINE.is_match(&bytes) {
        return Err(Error::invalid("unable to send request with invalid request line"));
    }
    let lines = bytes.iter().filter(|&&b| b == b'\n').count();
    if lines != expected + 1 || HEADER_LINE.find_iter(&bytes).count() != expected {
        return Err(Error::invalid(INVALID_HEADERS));
    }

    let mut bytes = bytes;
    bytes.extend_from_slice(b"\r\n");
    Ok(bytes)
}

/// Find the end of a response head in `buf`.
///
/// Returns the length of the head including its terminator. Whichever of
/// `\r\n\r\n` and `\n\n` starts first wins. `from` lets callers skip bytes
/// already scanned.
pub fn find_head_end(buf: &[u8], from: usize) -> Option<usize> {
    let start = from.min(buf.len());
    let crlf = find(&buf[start..], b"\r\n\r\n").map(|pos| (start + pos, 4));
    let lf = find(&buf[start..], b"\n\n").map(|pos| (start + pos, 2));

    match (crlf, lf) {
        (Some(c), Some(l)) if l.0 < c.0 => Some(l.0 + l.1),
        (Some(c), _) => Some(c.0 + c.1),
        (None, Some(l)) => Some(l.0 + l.1),
        (None, None) => None,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse a complete response head (status line through terminator).
pub fn parse_response_head(buf: &[u8]) -> Result<ResponseHead> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Response::new(&mut slots);

    match raw.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(Error::protocol("unable to parse response, head is incomplete"))
        }
        Err(e) => return Err(Error::protocol(format!("unable to parse response: {}", e))),
    }

    let version = match raw.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(Error::protocol("unable to parse response, unknown version")),
    };
    let status = raw
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| Error::protocol("unable to parse response, invalid status code"))?;
    let reason = ReasonPhrase(raw.reason.unwrap_or("").to_string());

    let mut headers = HeaderMap::with_capacity(raw.headers.len());
    for field in raw.headers.iter() {
        let name = HeaderName::from_bytes(field.name.as_bytes())
            .map_err(|_| Error::protocol(format!("invalid header name {:?}", field.name)))?;
        let value = HeaderValue::from_bytes(field.value)
            .map_err(|_| Error::protocol(format!("invalid value for header {}", name)))?;
        headers.append(name, value);
    }

    Ok(ResponseHead {
        version,
        status,
        reason,
        headers,
    })
}
