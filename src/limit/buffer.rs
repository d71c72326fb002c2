//! Holding back streaming request bodies while a request is queued.
//!
//! A queued request's body may keep producing data before its handler
//! runs. The body is wrapped so that everything produced in the meantime
//! is captured, then replayed in order once the handler starts and the
//! buffer is resumed.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::poll_fn;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::Request;
use tokio::task::JoinHandle;

use crate::body::Body;
use crate::error::Result;

struct Shared {
    upstream: Option<Body>,
    buffered: VecDeque<Result<Bytes>>,
    paused: bool,
    reader: Option<Waker>,
}

/// The paused body as seen by the handler.
pub struct PauseBuffer {
    shared: Rc<RefCell<Shared>>,
}

/// Resumes a [`PauseBuffer`]. Dropping it without resuming stops the
/// background capture.
pub struct Resume {
    shared: Rc<RefCell<Shared>>,
    pump: Option<JoinHandle<()>>,
}

impl Resume {
    /// Let the handler read: buffered chunks first, then live data.
    pub fn resume(self) {
        let reader = {
            let mut shared = self.shared.borrow_mut();
            shared.paused = false;
            shared.reader.take()
        };
        if let Some(reader) = reader {
            reader.wake();
        }
    }
}

impl Drop for Resume {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Wrap a streaming request body in a paused buffer.
///
/// Non-streaming bodies are returned untouched with no resume handle.
pub fn pause_body(request: Request<Body>) -> (Request<Body>, Option<Resume>) {
    if !request.body().is_streaming() {
        return (request, None);
    }

    let (parts, body) = request.into_parts();
    let size = body.size();
    let shared = Rc::new(RefCell::new(Shared {
        upstream: Some(body),
        buffered: VecDeque::new(),
        paused: true,
        reader: None,
    }));

    let pump = tokio::task::spawn_local(capture(Rc::clone(&shared)));
    let buffer = PauseBuffer {
        shared: Rc::clone(&shared),
    };
    let resume = Resume {
        shared,
        pump: Some(pump),
    };
    (
        Request::from_parts(parts, Body::from_stream(buffer, size)),
        Some(resume),
    )
}

/// Drain upstream into the buffer until resumed or upstream ends.
async fn capture(shared: Rc<RefCell<Shared>>) {
    poll_fn(|cx| {
        let mut guard = shared.borrow_mut();
        let shared = &mut *guard;
        loop {
            if !shared.paused {
                return Poll::Ready(());
            }
            let Some(upstream) = shared.upstream.as_mut() else {
                return Poll::Ready(());
            };
            match upstream.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => shared.buffered.push_back(item),
                Poll::Ready(None) => {
                    shared.upstream = None;
                    return Poll::Ready(());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    })
    .await
}

impl Stream for PauseBuffer {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut guard = self.shared.borrow_mut();
        let shared = &mut *guard;
        if let Some(item) = shared.buffered.pop_front() {
            return Poll::Ready(Some(item));
        }
        if shared.paused {
            shared.reader = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let Some(upstream) = shared.upstream.as_mut() else {
            return Poll::Ready(None);
        };
        match upstream.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                shared.upstream = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
