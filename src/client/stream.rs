//! Request streams.
//!
//! # Responsibilities
//! - Expose a writable handle for one outbound request
//! - Drive the exchange on a local task: connect, write, read the head
//! - Deliver the response (or the first failure) exactly once
//! - Return the connection to the pool or close it when the body finishes
//!
//! # Data Flow
//! ```text
//! RequestStream::write/end ──► Exchange ──Effect::Connect──► driver task
//!                                                              │
//!        pool.acquire ◄────────────────────────────────────────┘
//!             │
//!             ▼
//!   write outbox / read head ──Effect::Response──► Incoming body
//!                                                      │
//!                        pool.release or close ◄───────┘
//! ```
//!
//! # Design Decisions
//! - Shared state lives in `Rc<RefCell<_>>`; borrows never span an await
//! - Writes never block: bytes queue in an outbox and `write` returns
//!   false above the high-water mark
//! - Closing the handle before the response cancels an in-flight connect

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use bytes::{Buf, Bytes, BytesMut};
use http::{Response, Uri};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{oneshot, Notify};

use crate::body::Body;
use crate::client::exchange::{Completion, Effect, Exchange, State};
use crate::client::incoming::Incoming;
use crate::client::RequestHead;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::net::{Connector, Tracked};
use crate::observability::metrics;
use crate::pool::{Authority, ConnectionPool};
use crate::proto::{Decoder, ResponseHead};

const READ_CHUNK: usize = 8 * 1024;

type Starter = Box<dyn FnOnce(Rc<Inner>)>;

struct Shared {
    exchange: Exchange,
    outbox: VecDeque<Bytes>,
    outbox_len: usize,
    want_drain: bool,
    response_tx: Option<oneshot::Sender<Result<Response<Body>>>>,
    starter: Option<Starter>,
}

struct Inner {
    shared: RefCell<Shared>,
    high_water: usize,
    /// Wakes the driver: outbox data or cancellation.
    wake: Notify,
    /// Wakes `drained()` waiters.
    drain: Notify,
    /// Wakes `closed()` waiters.
    done: Notify,
}

impl Inner {
    fn state(&self) -> State {
        self.shared.borrow().exchange.state()
    }

    fn is_closed(&self) -> bool {
        self.state() == State::End
    }

    fn with_exchange<R>(&self, f: impl FnOnce(&mut Exchange) -> R) -> R {
        f(&mut self.shared.borrow_mut().exchange)
    }

    /// Perform notification effects; return those needing the connection.
    fn apply(self: &Rc<Self>, effects: Vec<Effect>) -> Vec<Effect> {
        let mut rest = Vec::new();
        for effect in effects {
            match effect {
                Effect::Connect => {
                    let starter = self.shared.borrow_mut().starter.take();
                    if let Some(start) = starter {
                        start(Rc::clone(self));
                    }
                }
                Effect::Write(bytes) => {
                    let mut shared = self.shared.borrow_mut();
                    shared.outbox_len += bytes.len();
                    shared.outbox.push_back(bytes);
                    drop(shared);
                    self.wake.notify_one();
                }
                Effect::Drain => self.shared.borrow_mut().want_drain = true,
                Effect::Fail(err) => {
                    metrics::record_exchange(err.kind());
                    tracing::debug!(error = %err, "Request failed");
                    let tx = self.shared.borrow_mut().response_tx.take();
                    if let Some(tx) = tx {
                        let _ = tx.send(Err(err));
                    }
                    self.finished();
                }
                other => rest.push(other),
            }
        }
        rest
    }

    /// Wake everything waiting on this stream after `End`.
    fn finished(&self) {
        self.wake.notify_one();
        self.drain.notify_waiters();
        self.done.notify_waiters();
    }

    fn front(&self) -> Option<Bytes> {
        self.shared.borrow().outbox.front().cloned()
    }

    /// Account for `n` bytes written from the front of the outbox.
    fn consumed(&self, n: usize) {
        let mut shared = self.shared.borrow_mut();
        shared.outbox_len -= n;
        if let Some(front) = shared.outbox.front_mut() {
            if n >= front.len() {
                shared.outbox.pop_front();
            } else {
                front.advance(n);
            }
        }
        let notify = shared.outbox.is_empty() && shared.want_drain;
        if notify {
            shared.want_drain = false;
        }
        drop(shared);
        if notify {
            self.drain.notify_waiters();
        }
    }

    fn clear_outbox(&self) -> usize {
        let mut shared = self.shared.borrow_mut();
        shared.outbox.clear();
        std::mem::take(&mut shared.outbox_len)
    }

    fn is_drained(&self) -> bool {
        let shared = self.shared.borrow();
        match shared.exchange.state() {
            State::End => true,
            State::HeadWritten => shared.outbox_len < self.high_water,
            State::Init | State::WritingHead => false,
        }
    }

    async fn until_closed(&self) {
        loop {
            let notified = self.wake.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

/// A writable handle for one outbound request.
///
/// Nothing touches the network until the first [`write`](Self::write) or
/// [`end`](Self::end). The response is delivered through
/// [`response`](Self::response). Must be used on a
/// [`tokio::task::LocalSet`].
pub struct RequestStream {
    inner: Rc<Inner>,
    response_rx: Option<oneshot::Receiver<Result<Response<Body>>>>,
}

impl RequestStream {
    pub(crate) fn new<C: Connector>(
        head: RequestHead,
        pool: ConnectionPool<C>,
        config: &ClientConfig,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let uri = head.uri().clone();
        let starter: Starter = Box::new(move |inner: Rc<Inner>| {
            tokio::task::spawn_local(drive(inner, pool, uri));
        });

        let inner = Rc::new(Inner {
            shared: RefCell::new(Shared {
                exchange: Exchange::new(&head, config.max_head_size),
                outbox: VecDeque::new(),
                outbox_len: 0,
                want_drain: false,
                response_tx: Some(tx),
                starter: Some(starter),
            }),
            high_water: config.write_high_water,
            wake: Notify::new(),
            drain: Notify::new(),
            done: Notify::new(),
        });

        Self {
            inner,
            response_rx: Some(rx),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.inner.state()
    }

    /// Whether `write` would accept data.
    pub fn is_writable(&self) -> bool {
        self.inner.shared.borrow().exchange.is_writable()
    }

    /// Write request body bytes.
    ///
    /// The first write starts the request. Returns false when the stream is
    /// no longer writable, while waiting for a connection, or when queued
    /// bytes exceed the high-water mark; wait on
    /// [`drained`](Self::drained) before writing more.
    pub fn write(&self, data: impl Into<Bytes>) -> bool {
        if !self.is_writable() {
            return false;
        }
        let effects = self.inner.with_exchange(|ex| ex.write(data.into()));
        self.inner.apply(effects);

        let mut shared = self.inner.shared.borrow_mut();
        let accepted = shared.exchange.state() == State::HeadWritten
            && shared.outbox_len < self.inner.high_water;
        if !accepted && shared.exchange.state() != State::End {
            shared.want_drain = true;
        }
        accepted
    }

    /// Finish the request, optionally with a final chunk.
    ///
    /// Ending an untouched stream sends the head alone. Calling it again
    /// is a no-op.
    pub fn end(&self, data: Option<Bytes>) {
        let effects = self.inner.with_exchange(|ex| ex.end(data));
        self.inner.apply(effects);
    }

    /// Abort the request.
    ///
    /// Before a response arrives this fails the response with a
    /// cancellation error and closes any connection; afterwards it only
    /// marks the stream finished.
    pub fn close(&self) {
        let effects = self.inner.with_exchange(Exchange::close);
        self.inner.apply(effects);
        self.inner.finished();
    }

    /// Wait for the response head.
    ///
    /// Resolves exactly once; later calls fail with an invalid-argument
    /// error. Dropping the returned future before it resolves leaves the
    /// request pending, and dropping the stream then cancels it.
    pub async fn response(&mut self) -> Result<Response<Body>> {
        let rx = self
            .response_rx
            .as_mut()
            .ok_or_else(|| Error::invalid("response already taken"))?;
        let outcome = rx.await;
        self.response_rx = None;
        outcome.unwrap_or_else(|_| Err(Error::Cancelled("request stream dropped")))
    }

    /// Wait until writing may continue.
    pub async fn drained(&self) {
        loop {
            let notified = self.inner.drain.notified();
            if self.inner.is_drained() {
                return;
            }
            notified.await;
        }
    }

    /// Wait until the stream reaches `End`.
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.done.notified();
            if self.inner.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for RequestStream {
    /// A stream whose response was never delivered is cancelled.
    fn drop(&mut self) {
        if self.response_rx.is_some() {
            self.close();
        }
    }
}

async fn drive<C: Connector>(inner: Rc<Inner>, pool: ConnectionPool<C>, uri: Uri) {
    let authority = match Authority::from_uri(&uri) {
        Ok(authority) => authority,
        Err(err) => return fail(&inner, err),
    };

    tracing::debug!(authority = %authority, path = uri.path(), "Starting request");
    let conn = tokio::select! {
        biased;
        _ = inner.until_closed() => return,
        res = pool.acquire_for(&authority) => match res {
            Ok(conn) => conn,
            Err(err) => return fail(&inner, err),
        },
    };

    let effects = inner.with_exchange(Exchange::connected);
    if !inner.apply(effects).is_empty() {
        return;
    }

    let io = Tracked::new(conn);
    let conn_id = io.id();
    tracing::debug!(authority = %authority, conn = %conn_id, "Request head queued");

    let (mut reader, mut writer) = tokio::io::split(io);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    let response = loop {
        buf.reserve(READ_CHUNK);
        let next = inner.front();
        let effects = tokio::select! {
            res = reader.read_buf(&mut buf) => match res {
                Ok(0) => inner.with_exchange(Exchange::peer_ended),
                Ok(_) => {
                    let data = buf.split();
                    inner.with_exchange(|ex| ex.received(&data))
                }
                Err(err) => inner.with_exchange(|ex| ex.transport_error(err)),
            },
            res = write_some(&mut writer, next.as_ref()), if next.is_some() => match res {
                Ok(n) => {
                    inner.consumed(n);
                    Vec::new()
                }
                Err(err) => inner.with_exchange(|ex| ex.transport_error(err)),
            },
            _ = inner.wake.notified() => Vec::new(),
        };

        let mut response = None;
        for effect in inner.apply(effects) {
            if let Effect::Response { head, length, rest } = effect {
                response = Some((head, length, rest));
            }
        }
        if let Some(response) = response {
            break response;
        }
        if inner.is_closed() {
            tracing::debug!(conn = %conn_id, "Closing connection");
            return;
        }
    };

    let (head, length, rest) = response;
    if inner.clear_outbox() > 0 {
        inner.with_exchange(Exchange::mark_unsent);
    }

    tracing::debug!(
        conn = %conn_id,
        status = head.status.as_u16(),
        framing = length.as_str(),
        "Response head received"
    );

    let io = reader.unsplit(writer);
    let on_finish = {
        let inner = Rc::clone(&inner);
        Box::new(move |io: Tracked<C::Connection>, done: Completion| {
            let reuse = inner.with_exchange(|ex| ex.body_finished(done));
            tracing::debug!(conn = %io.id(), reuse, "Response body finished");
            if reuse {
                metrics::record_exchange("reused");
                pool.release_for(authority, io.into_inner());
            } else {
                metrics::record_exchange("closed");
                drop(io);
            }
            inner.finished();
        })
    };

    let incoming = Incoming::new(io, Decoder::new(length), rest, on_finish);
    let response = into_response(head, Body::from_stream(incoming, length.size_hint()));

    let tx = inner.shared.borrow_mut().response_tx.take();
    if let Some(tx) = tx {
        let _ = tx.send(Ok(response));
    }
}

fn fail(inner: &Rc<Inner>, err: Error) {
    let effects = inner.with_exchange(|ex| ex.fail(err));
    inner.apply(effects);
}

async fn write_some<W>(writer: &mut W, chunk: Option<&Bytes>) -> io::Result<usize>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let Some(chunk) = chunk else {
        return Ok(0);
    };
    match writer.write(chunk).await? {
        0 => Err(io::ErrorKind::WriteZero.into()),
        n => Ok(n),
    }
}

fn into_response(head: ResponseHead, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = head.status;
    *response.version_mut() = head.version;
    *response.headers_mut() = head.headers;
    response.extensions_mut().insert(head.reason);
    response
}
