//! Response body reader.
//!
//! Once the response head is parsed, the connection moves into an
//! [`Incoming`] stream. It decodes the body, replays bytes that arrived
//! together with the head, and reports how the body finished so the
//! connection can be pooled or closed. Dropping it early counts as an
//! unclean finish.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio::io::{AsyncRead, ReadBuf};

use crate::client::exchange::Completion;
use crate::error::{Error, Result};
use crate::net::{Connection, Tracked};
use crate::proto::{Decoded, Decoder};

const READ_CHUNK: usize = 8 * 1024;

pub(crate) type OnFinish<T> = Box<dyn FnOnce(Tracked<T>, Completion)>;

pub(crate) struct Incoming<T: Connection> {
    io: Option<Tracked<T>>,
    decoder: Decoder,
    buf: BytesMut,
    scratch: Box<[u8]>,
    on_finish: Option<OnFinish<T>>,
}

impl<T: Connection> Incoming<T> {
    /// `rest` holds bytes read past the response head.
    ///
    /// A body that is already complete (zero length) finishes here, before
    /// the response is handed to the caller.
    pub(crate) fn new(io: Tracked<T>, decoder: Decoder, rest: BytesMut, on_finish: OnFinish<T>) -> Self {
        let mut incoming = Self {
            io: Some(io),
            decoder,
            buf: rest,
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
            on_finish: Some(on_finish),
        };
        if incoming.decoder.is_done() {
            incoming.finish(true);
        }
        incoming
    }

    fn finish(&mut self, clean: bool) {
        let (Some(io), Some(on_finish)) = (self.io.take(), self.on_finish.take()) else {
            return;
        };
        let done = Completion {
            clean,
            readable: io.is_readable(),
            surplus: !self.buf.is_empty(),
        };
        on_finish(io, done);
    }

    fn fail(&mut self, err: Error) -> Poll<Option<Result<Bytes>>> {
        self.finish(false);
        Poll::Ready(Some(Err(err)))
    }
}

impl<T: Connection> Stream for Incoming<T> {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            match this.decoder.decode(&mut this.buf) {
                Ok(Decoded::Data(chunk)) => {
                    if this.decoder.is_done() {
                        this.finish(true);
                    }
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Ok(Decoded::Done) => {
                    this.finish(true);
                    return Poll::Ready(None);
                }
                Ok(Decoded::NeedMore) => {}
                Err(err) => return this.fail(err),
            }

            let Some(io) = this.io.as_mut() else {
                return Poll::Ready(None);
            };
            let mut read = ReadBuf::new(&mut this.scratch);
            match Pin::new(io).poll_read(cx, &mut read) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(err)) => return this.fail(Error::Transport(err)),
                Poll::Ready(Ok(())) => {
                    let n = read.filled().len();
                    if n == 0 {
                        return match this.decoder.finish_on_eof() {
                            Ok(()) => {
                                this.finish(true);
                                Poll::Ready(None)
                            }
                            Err(err) => this.fail(err),
                        };
                    }
                    this.buf.extend_from_slice(&this.scratch[..n]);
                }
            }
        }
    }
}

impl<T: Connection> Drop for Incoming<T> {
    fn drop(&mut self) {
        self.finish(false);
    }
}
