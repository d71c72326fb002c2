//! Incremental response body decoding.
//!
//! A [`Decoder`] pulls body bytes out of a receive buffer as they arrive.
//! Chunked framing is tracked across reads, so a chunk header, its data or
//! its terminator may be split at any byte.

use std::cmp;

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::proto::BodyLength;

/// Longest chunk-size line (including extensions) or trailer line accepted.
const MAX_LINE: usize = 4096;

/// Result of one decode step.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Data(Bytes),
    NeedMore,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunked {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(u64),
    Chunked(Chunked),
    Eof(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoder {
    kind: Kind,
}

impl Decoder {
    pub fn new(length: BodyLength) -> Self {
        let kind = match length {
            BodyLength::Zero => Kind::Length(0),
            BodyLength::Fixed(n) => Kind::Length(n),
            BodyLength::Chunked => Kind::Chunked(Chunked::Size),
            BodyLength::Unbounded => Kind::Eof(false),
        };
        Self { kind }
    }

    /// True once the body is complete and no more bytes belong to it.
    pub fn is_done(&self) -> bool {
        matches!(
            self.kind,
            Kind::Length(0) | Kind::Chunked(Chunked::End) | Kind::Eof(true)
        )
    }

    /// Take the next piece of body out of `buf`.
    ///
    /// Bytes past the end of the body are left in `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded> {
        match &mut self.kind {
            Kind::Length(0) => Ok(Decoded::Done),
            Kind::Length(remaining) => {
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let n = cmp::min(*remaining, buf.len() as u64) as usize;
                *remaining -= n as u64;
                Ok(Decoded::Data(buf.split_to(n).freeze()))
            }
            Kind::Chunked(state) => decode_chunked(state, buf),
            Kind::Eof(true) => Ok(Decoded::Done),
            Kind::Eof(false) => {
                if buf.is_empty() {
                    Ok(Decoded::NeedMore)
                } else {
                    Ok(Decoded::Data(buf.split().freeze()))
                }
            }
        }
    }

    /// The connection reached EOF. Fails unless EOF is a valid body end.
    pub fn finish_on_eof(&mut self) -> Result<()> {
        match &mut self.kind {
            Kind::Eof(done) => {
                *done = true;
                Ok(())
            }
            Kind::Length(0) | Kind::Chunked(Chunked::End) => Ok(()),
            Kind::Length(remaining) => Err(Error::protocol(format!(
                "connection closed before the full body was received ({} bytes missing)",
                remaining
            ))),
            Kind::Chunked(_) => Err(Error::protocol(
                "connection closed before the chunked body was complete",
            )),
        }
    }
}

fn decode_chunked(state: &mut Chunked, buf: &mut BytesMut) -> Result<Decoded> {
    loop {
        match *state {
            Chunked::Size => {
                let Some(line) = take_line(buf, MAX_LINE, "chunk size line too long")? else {
                    return Ok(Decoded::NeedMore);
                };
                let size = parse_chunk_size(&line)?;
                *state = if size == 0 {
                    Chunked::Trailers
                } else {
                    Chunked::Data(size)
                };
            }
            Chunked::Data(remaining) => {
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let n = cmp::min(remaining, buf.len() as u64) as usize;
                let left = remaining - n as u64;
                *state = if left == 0 {
                    Chunked::DataEnd
                } else {
                    Chunked::Data(left)
                };
                return Ok(Decoded::Data(buf.split_to(n).freeze()));
            }
            Chunked::DataEnd => {
                let Some(line) = take_line(buf, 1, "missing CRLF after chunk data")? else {
                    return Ok(Decoded::NeedMore);
                };
                if !line.is_empty() {
                    return Err(Error::protocol("missing CRLF after chunk data"));
                }
                *state = Chunked::Size;
            }
            Chunked::Trailers => {
                let Some(line) = take_line(buf, MAX_LINE, "chunk trailer too long")? else {
                    return Ok(Decoded::NeedMore);
                };
                if line.is_empty() {
                    *state = Chunked::End;
                }
            }
            Chunked::End => return Ok(Decoded::Done),
        }
    }
}

/// Split one line off `buf`, without its `\n` or `\r\n`.
fn take_line(buf: &mut BytesMut, limit: usize, what: &'static str) -> Result<Option<BytesMut>> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(pos) if pos > limit => Err(Error::protocol(what)),
        Some(pos) => {
            let mut line = buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            Ok(Some(line))
        }
        None if buf.len() > limit => Err(Error::protocol(what)),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let size = line.split(|&b| b == b';').next().unwrap_or(line).trim_ascii();
    std::str::from_utf8(size)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| u64::from_str_radix(s, 16).ok())
        .ok_or_else(|| Error::protocol("invalid chunk size"))
}
