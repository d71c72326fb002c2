//! Admission control core.
//!
//! # Responsibilities
//! - Count running handlers against a fixed limit
//! - Queue excess requests in arrival order
//! - Hand a finished handler's slot directly to the oldest queued request
//! - Remove cancelled or abandoned requests from the queue
//!
//! # Design Decisions
//! - Slots are released by dropping a [`Permit`], so every exit path of a
//!   handler (success, error, panic, cancellation) frees its slot
//! - The queue is keyed by a monotonically increasing slot id; removal is
//!   O(log n) and dispatch pops the smallest id

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::config::LimiterConfig;
use crate::error::{Error, Result};
use crate::observability::metrics;

type Waiter = oneshot::Sender<Result<()>>;

#[derive(Debug)]
struct State {
    limit: usize,
    pending: usize,
    next_slot: u64,
    queue: BTreeMap<u64, Waiter>,
}

impl State {
    fn record(&self) {
        metrics::record_limiter(self.pending, self.queue.len());
    }
}

/// Shared admission counter.
///
/// Clones share the same counter and queue.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    state: Rc<RefCell<State>>,
}

impl ConcurrencyLimiter {
    /// Create a new limiter. A limit of zero is raised to one.
    pub fn new(limit: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                limit: limit.max(1),
                pending: 0,
                next_slot: 0,
                queue: BTreeMap::new(),
            })),
        }
    }

    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::new(config.limit)
    }

    pub fn limit(&self) -> usize {
        self.state.borrow().limit
    }

    /// Handlers currently holding a slot.
    pub fn pending(&self) -> usize {
        self.state.borrow().pending
    }

    /// Requests waiting for a slot.
    pub fn queued(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Take a slot if one is free.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.state.borrow_mut();
        if state.pending >= state.limit {
            return None;
        }
        state.pending += 1;
        state.record();
        Some(Permit {
            state: Rc::clone(&self.state),
        })
    }

    /// Join the queue.
    ///
    /// The ticket resolves to a permit once a slot is handed over, or to a
    /// cancellation error if the canceller fires first.
    pub fn enqueue(&self) -> (Ticket, Canceller) {
        let (tx, rx) = oneshot::channel();
        let slot = {
            let mut state = self.state.borrow_mut();
            state.next_slot += 1;
            let slot = state.next_slot;
            state.queue.insert(slot, tx);
            state.record();
            slot
        };
        tracing::trace!(slot, "Request queued");

        let ticket = Ticket {
            state: Rc::clone(&self.state),
            slot,
            rx,
            settled: false,
        };
        let canceller = Canceller {
            state: Rc::downgrade(&self.state),
            slot,
        };
        (ticket, canceller)
    }

    /// Take a slot now or wait for one.
    pub async fn acquire(&self) -> Result<Permit> {
        match self.try_acquire() {
            Some(permit) => Ok(permit),
            None => self.enqueue().0.await,
        }
    }
}

/// A held slot. Dropping it frees the slot or passes it on.
#[derive(Debug)]
pub struct Permit {
    state: Rc<RefCell<State>>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        advance(&self.state);
    }
}

/// Release one slot and dispatch queued requests while slots are free.
///
/// When a queued request is dispatched its slot is taken over directly, so
/// `pending` does not change.
fn advance(state: &RefCell<State>) {
    let mut state = state.borrow_mut();
    state.pending = state.pending.saturating_sub(1);
    while state.pending < state.limit {
        let Some((slot, waiter)) = state.queue.pop_first() else {
            break;
        };
        if waiter.send(Ok(())).is_ok() {
            state.pending += 1;
            tracing::trace!(slot, "Dispatching queued request");
        }
    }
    state.record();
}

/// Cancels one queued request.
#[derive(Debug, Clone)]
pub struct Canceller {
    state: Weak<RefCell<State>>,
    slot: u64,
}

impl Canceller {
    /// Fail the queued request with a cancellation error.
    ///
    /// Returns false if the request already left the queue (dispatched or
    /// cancelled); its handler is then unaffected.
    pub fn cancel(&self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let waiter = {
            let mut state = state.borrow_mut();
            let waiter = state.queue.remove(&self.slot);
            state.record();
            waiter
        };
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(Err(Error::Cancelled("cancelled queued handler")));
                metrics::record_cancelled();
                tracing::debug!(slot = self.slot, "Queued request cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether the request is still waiting for a slot.
    pub fn is_queued(&self) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| state.borrow().queue.contains_key(&self.slot))
    }
}

/// A place in the queue.
///
/// Dropping an unresolved ticket leaves the queue; dropping one that was
/// handed a slot but never polled passes the slot on.
#[derive(Debug)]
pub struct Ticket {
    state: Rc<RefCell<State>>,
    slot: u64,
    rx: oneshot::Receiver<Result<()>>,
    settled: bool,
}

impl Future for Ticket {
    type Output = Result<Permit>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => Err(Error::Cancelled("cancelled queued handler")),
        };
        self.settled = true;
        Poll::Ready(outcome.map(|()| Permit {
            state: Rc::clone(&self.state),
        }))
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let removed = {
            let mut state = self.state.borrow_mut();
            let removed = state.queue.remove(&self.slot).is_some();
            state.record();
            removed
        };
        if !removed && matches!(self.rx.try_recv(), Ok(Ok(()))) {
            drop(Permit {
                state: Rc::clone(&self.state),
            });
        }
    }
}
