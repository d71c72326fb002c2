//! Response body framing.

use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, StatusCode};

use crate::error::{Error, Result};
use crate::proto::headers;

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// No body follows the head.
    Zero,
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Exactly this many bytes (`Content-Length`).
    Fixed(u64),
    /// Everything until the peer closes.
    Unbounded,
}

impl BodyLength {
    /// Determine framing for a response to `method`.
    ///
    /// HEAD responses, 1xx, 204 and 304 never carry a body. Chunked coding
    /// takes precedence over `Content-Length`. Conflicting or unparsable
    /// lengths are a protocol error.
    pub fn for_response(method: &Method, status: StatusCode, headers: &HeaderMap) -> Result<Self> {
        if *method == Method::HEAD
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            return Ok(BodyLength::Zero);
        }

        if headers::response_is_chunked(headers) {
            return Ok(BodyLength::Chunked);
        }

        let mut length = None;
        for value in headers.get_all(CONTENT_LENGTH) {
            let parsed = value
                .to_str()
                .ok()
                .map(str::trim)
                .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| Error::protocol("invalid Content-Length header"))?;
            match length {
                Some(previous) if previous != parsed => {
                    return Err(Error::protocol("conflicting Content-Length headers"))
                }
                _ => length = Some(parsed),
            }
        }

        Ok(match length {
            Some(0) => BodyLength::Zero,
            Some(n) => BodyLength::Fixed(n),
            None => BodyLength::Unbounded,
        })
    }

    /// Exact body size when known up front.
    pub fn size_hint(&self) -> Option<u64> {
        match self {
            BodyLength::Zero => Some(0),
            BodyLength::Fixed(n) => Some(*n),
            BodyLength::Chunked | BodyLength::Unbounded => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BodyLength::Zero => "empty",
            BodyLength::Chunked => "chunked",
            BodyLength::Fixed(_) => "content-length",
            BodyLength::Unbounded => "close-delimited",
        }
    }
}
