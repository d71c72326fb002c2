//! Message bodies.
//!
//! A [`Body`] is either fully buffered or a stream of chunks. Streaming
//! bodies carry an optional exact size so consumers can tell how many
//! bytes to expect before reading.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes>>>>;

enum Kind {
    Empty,
    Full(Option<Bytes>),
    Streaming { stream: BoxStream, size: Option<u64> },
}

/// Body of a request or response.
pub struct Body {
    kind: Kind,
}

impl Body {
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    pub fn full(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        if data.is_empty() {
            return Self::empty();
        }
        Self {
            kind: Kind::Full(Some(data)),
        }
    }

    /// Wrap a chunk stream. `size` is the exact byte count when known.
    pub fn from_stream<S>(stream: S, size: Option<u64>) -> Self
    where
        S: Stream<Item = Result<Bytes>> + 'static,
    {
        Self {
            kind: Kind::Streaming {
                stream: Box::pin(stream),
                size,
            },
        }
    }

    /// A streaming body fed through the returned sender.
    ///
    /// The body ends when the sender is dropped.
    pub fn channel(size: Option<u64>) -> (BodySender, Body) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = stream::poll_fn(move |cx| rx.poll_recv(cx));
        (BodySender { tx }, Body::from_stream(stream, size))
    }

    /// Exact size in bytes, if known.
    pub fn size(&self) -> Option<u64> {
        match &self.kind {
            Kind::Empty => Some(0),
            Kind::Full(data) => Some(data.as_ref().map_or(0, |d| d.len() as u64)),
            Kind::Streaming { size, .. } => *size,
        }
    }

    /// True when data arrives over time rather than being buffered.
    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, Kind::Streaming { .. })
    }

    /// Read the whole body into one buffer.
    pub async fn collect(mut self) -> Result<Bytes> {
        if let Kind::Full(data) = &mut self.kind {
            return Ok(data.take().unwrap_or_default());
        }
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Kind::Empty => "empty",
            Kind::Full(_) => "full",
            Kind::Streaming { .. } => "streaming",
        };
        f.debug_struct("Body")
            .field("kind", &kind)
            .field("size", &self.size())
            .finish()
    }
}

impl Stream for Body {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Full(data) => Poll::Ready(data.take().map(Ok)),
            Kind::Streaming { stream, .. } => stream.as_mut().poll_next(cx),
        }
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Body::full(data)
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Body::full(data)
    }
}

impl From<String> for Body {
    fn from(data: String) -> Self {
        Body::full(data)
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self {
        Body::full(Bytes::from_static(data.as_bytes()))
    }
}

/// Producer half of [`Body::channel`].
#[derive(Debug, Clone)]
pub struct BodySender {
    tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl BodySender {
    /// Queue a chunk. Returns false once the body has been dropped.
    pub fn send(&self, chunk: impl Into<Bytes>) -> bool {
        self.tx.send(Ok(chunk.into())).is_ok()
    }

    /// End the body with an error.
    pub fn abort(self, err: Error) {
        let _ = self.tx.send(Err(err));
    }
}
