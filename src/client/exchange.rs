//! Request/response exchange state machine.
//!
//! # Responsibilities
//! - Track the lifecycle of one request on one connection
//! - Buffer body bytes written before a connection exists
//! - Detect the end of the response head and choose body framing
//! - Decide whether the connection may be reused
//!
//! # Data Flow
//! ```text
//! write()/end() ──► Init ──► WritingHead ──(connected)──► HeadWritten ──► End
//!                               │                              │
//!                               └──(fail/close)────────────────┴──► End
//! ```
//!
//! # Design Decisions
//! - Sans-io: every input returns the effects the driver must perform
//! - `End` is terminal and reached exactly once; every later input is a
//!   no-op
//! - The reuse decision takes an explicit [`Completion`] record instead of
//!   flags scattered over the driver

use bytes::{Bytes, BytesMut};
use http::Method;

use crate::client::RequestHead;
use crate::error::Error;
use crate::proto::head::{self, ResponseHead};
use crate::proto::{headers, BodyLength};

/// Lifecycle of a request stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing written yet.
    Init,
    /// Head serialized, waiting for a connection.
    WritingHead,
    /// Head on the wire, waiting for the response.
    HeadWritten,
    /// Finished; no further events.
    End,
}

/// Work the driver must perform in response to an input.
#[derive(Debug)]
pub(crate) enum Effect {
    /// Obtain a connection from the pool.
    Connect,
    /// Put these bytes on the wire.
    Write(Bytes),
    /// Writers waiting for drain may continue once the outbox flushes.
    Drain,
    /// A response head arrived.
    Response {
        head: ResponseHead,
        length: BodyLength,
        rest: BytesMut,
    },
    /// Close the connection.
    Close,
    /// Surface an error to whoever awaits the response.
    Fail(Error),
}

/// How the response body finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Completion {
    /// The body reached its framed end without error.
    pub clean: bool,
    /// The connection saw neither EOF nor an error.
    pub readable: bool,
    /// Bytes arrived past the end of the body.
    pub surplus: bool,
}

pub(crate) struct Exchange {
    state: State,
    method: Method,
    request_keep_alive: bool,
    response_keep_alive: bool,
    head: Option<Bytes>,
    invalid: Option<Error>,
    pending: BytesMut,
    recv: BytesMut,
    scanned: usize,
    max_head_size: usize,
    ended: bool,
    responded: bool,
    unsent: bool,
}

impl Exchange {
    /// The head is serialized and validated up front; a validation failure
    /// surfaces on the first write or end, before any connect.
    pub(crate) fn new(request: &RequestHead, max_head_size: usize) -> Self {
        let (head, invalid) = match head::encode_request_head(request) {
            Ok(bytes) => (Some(Bytes::from(bytes)), None),
            Err(err) => (None, Some(err)),
        };
        Self {
            state: State::Init,
            method: request.method().clone(),
            request_keep_alive: request.keep_alive(),
            response_keep_alive: false,
            head,
            invalid,
            pending: BytesMut::new(),
            recv: BytesMut::new(),
            scanned: 0,
            max_head_size,
            ended: false,
            responded: false,
            unsent: false,
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    /// Whether `write` would accept data.
    pub(crate) fn is_writable(&self) -> bool {
        !self.ended && !self.responded && self.state != State::End
    }

    /// Body bytes from the caller.
    pub(crate) fn write(&mut self, data: Bytes) -> Vec<Effect> {
        if !self.is_writable() {
            return Vec::new();
        }
        match self.state {
            State::Init => {
                self.pending.extend_from_slice(&data);
                self.start()
            }
            State::WritingHead => {
                self.pending.extend_from_slice(&data);
                Vec::new()
            }
            State::HeadWritten if !data.is_empty() => vec![Effect::Write(data)],
            State::HeadWritten | State::End => Vec::new(),
        }
    }

    /// The caller finished the request body.
    pub(crate) fn end(&mut self, data: Option<Bytes>) -> Vec<Effect> {
        if !self.is_writable() {
            return Vec::new();
        }
        let effects = match data {
            Some(data) if !data.is_empty() => self.write(data),
            _ if self.state == State::Init => self.start(),
            _ => Vec::new(),
        };
        self.ended = true;
        effects
    }

    fn start(&mut self) -> Vec<Effect> {
        self.state = State::WritingHead;
        match self.invalid.take() {
            Some(err) => self.fail(err),
            None => vec![Effect::Connect],
        }
    }

    /// A connection is ready: flush head plus anything buffered.
    pub(crate) fn connected(&mut self) -> Vec<Effect> {
        if self.state != State::WritingHead {
            return vec![Effect::Close];
        }
        let Some(head) = self.head.take() else {
            return self.fail(Error::invalid("request head already written"));
        };

        self.state = State::HeadWritten;
        if self.pending.is_empty() {
            return vec![Effect::Write(head)];
        }

        let mut out = BytesMut::with_capacity(head.len() + self.pending.len());
        out.extend_from_slice(&head);
        out.extend_from_slice(&self.pending.split());
        vec![Effect::Write(out.freeze()), Effect::Drain]
    }

    /// Bytes read from the connection while waiting for the response head.
    pub(crate) fn received(&mut self, data: &[u8]) -> Vec<Effect> {
        if self.state != State::HeadWritten || self.responded {
            return Vec::new();
        }

        let from = self.scanned.saturating_sub(3);
        self.recv.extend_from_slice(data);
        let found = head::find_head_end(&self.recv, from);
        if found.unwrap_or(self.recv.len()) > self.max_head_size {
            return self.fail(Error::protocol(format!(
                "response head exceeds {} bytes",
                self.max_head_size
            )));
        }
        let Some(end) = found else {
            self.scanned = self.recv.len();
            return Vec::new();
        };

        let raw = self.recv.split_to(end);
        let parsed = head::parse_response_head(&raw).and_then(|head| {
            BodyLength::for_response(&self.method, head.status, &head.headers)
                .map(|length| (head, length))
        });
        let (head, length) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => return self.fail(err),
        };

        self.response_keep_alive = headers::response_keep_alive(head.version, &head.headers);
        self.responded = true;
        let rest = self.recv.split();
        vec![Effect::Response { head, length, rest }]
    }

    /// Outbound bytes were still queued when the response arrived.
    pub(crate) fn mark_unsent(&mut self) {
        self.unsent = true;
    }

    /// The peer ended the connection.
    pub(crate) fn peer_ended(&mut self) -> Vec<Effect> {
        if self.responded {
            return Vec::new();
        }
        self.fail(Error::ConnectionEnded)
    }

    /// The connection failed.
    pub(crate) fn transport_error(&mut self, err: std::io::Error) -> Vec<Effect> {
        if self.responded {
            return Vec::new();
        }
        self.fail(Error::Transport(err))
    }

    /// The response body finished; returns true if the connection may be
    /// pooled.
    pub(crate) fn body_finished(&mut self, done: Completion) -> bool {
        if self.state == State::End {
            return false;
        }
        self.state = State::End;
        done.clean
            && done.readable
            && !done.surplus
            && self.ended
            && !self.unsent
            && self.request_keep_alive
            && self.response_keep_alive
    }

    /// Caller closed the stream.
    pub(crate) fn close(&mut self) -> Vec<Effect> {
        let reason = match self.state {
            State::Init | State::WritingHead => "request closed before a connection was established",
            State::HeadWritten if !self.responded => "request closed before receiving response",
            _ => {
                self.state = State::End;
                return Vec::new();
            }
        };
        self.fail(Error::Cancelled(reason))
    }

    pub(crate) fn fail(&mut self, err: Error) -> Vec<Effect> {
        if self.state == State::End {
            return Vec::new();
        }
        self.state = State::End;
        vec![Effect::Close, Effect::Fail(err)]
    }
}
