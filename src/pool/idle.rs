//! Idle connection pool.
//!
//! # Responsibilities
//! - Hand out a parked connection for a matching authority, or connect
//! - Park released connections and watch them while idle
//! - Evict idle connections on timeout, unsolicited data, EOF or error
//!
//! # Design Decisions
//! - Claiming an entry cancels its watcher in the same step, so a claimed
//!   connection can never also be evicted
//! - Eviction is keyed by entry id and is a no-op for unknown ids
//! - The table is `Rc<RefCell<_>>`; no borrow is held across an await

use std::cell::RefCell;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::Poll;
use std::time::Duration;

use http::Uri;
use tokio::io::ReadBuf;
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::error::Result;
use crate::net::{Connection, Connector};
use crate::observability::metrics;
use crate::pool::Authority;

type Slot<T> = Rc<RefCell<Option<T>>>;

/// Why an idle connection left the pool without being reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eviction {
    Timeout,
    Data,
    Closed,
    Error,
}

impl Eviction {
    fn as_str(self) -> &'static str {
        match self {
            Eviction::Timeout => "timeout",
            Eviction::Data => "data",
            Eviction::Closed => "closed",
            Eviction::Error => "error",
        }
    }
}

struct IdleEntry<T> {
    id: u64,
    authority: Authority,
    slot: Slot<T>,
    watcher: Option<JoinHandle<()>>,
}

struct IdleTable<T> {
    entries: Vec<IdleEntry<T>>,
    next_id: u64,
}

impl<T> IdleTable<T> {
    fn remove(&mut self, id: u64) -> Option<IdleEntry<T>> {
        let pos = self.entries.iter().position(|entry| entry.id == id)?;
        let entry = self.entries.remove(pos);
        metrics::record_idle(self.entries.len());
        Some(entry)
    }
}

impl<T> Drop for IdleTable<T> {
    fn drop(&mut self) {
        for entry in self.entries.drain(..) {
            if let Some(watcher) = entry.watcher {
                watcher.abort();
            }
        }
    }
}

/// Reuses persistent connections per authority.
///
/// Cloning is cheap and every clone shares the same idle table. All
/// operations must run on a [`tokio::task::LocalSet`].
pub struct ConnectionPool<C: Connector> {
    connector: Rc<C>,
    idle_eviction: Duration,
    table: Rc<RefCell<IdleTable<C::Connection>>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Rc::clone(&self.connector),
            idle_eviction: self.idle_eviction,
            table: Rc::clone(&self.table),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a new pool around a connector.
    pub fn new(connector: C, config: &PoolConfig) -> Self {
        Self {
            connector: Rc::new(connector),
            idle_eviction: config.idle_eviction(),
            table: Rc::new(RefCell::new(IdleTable {
                entries: Vec::new(),
                next_id: 0,
            })),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Get a connection for the URI's authority.
    ///
    /// A parked connection for the exact authority is returned immediately;
    /// otherwise a new one is opened. Fails with an invalid-argument error
    /// for schemes other than http and https.
    pub async fn acquire(&self, uri: &Uri) -> Result<C::Connection> {
        let authority = Authority::from_uri(uri)?;
        self.acquire_for(&authority).await
    }

    pub(crate) async fn acquire_for(&self, authority: &Authority) -> Result<C::Connection> {
        if let Some(conn) = self.claim(authority) {
            metrics::record_acquire(true);
            tracing::debug!(authority = %authority, "Reusing idle connection");
            return Ok(conn);
        }

        metrics::record_acquire(false);
        let conn = self.connector.connect(authority).await?;
        tracing::debug!(authority = %authority, "Opened new connection");
        Ok(conn)
    }

    /// Park a connection for later reuse by the URI's authority.
    ///
    /// The connection is watched while idle and closed on the first of:
    /// the eviction delay elapsing, unsolicited data, EOF or an error.
    pub fn release(&self, uri: &Uri, conn: C::Connection) -> Result<()> {
        let authority = Authority::from_uri(uri)?;
        self.release_for(authority, conn);
        Ok(())
    }

    pub(crate) fn release_for(&self, authority: Authority, conn: C::Connection) {
        let slot: Slot<C::Connection> = Rc::new(RefCell::new(Some(conn)));
        let id = {
            let mut table = self.table.borrow_mut();
            table.next_id += 1;
            table.next_id
        };

        let watcher = tokio::task::spawn_local(watch(
            Rc::downgrade(&self.table),
            id,
            Rc::clone(&slot),
            self.idle_eviction,
        ));

        tracing::debug!(authority = %authority, entry = id, "Parked idle connection");
        let mut table = self.table.borrow_mut();
        table.entries.push(IdleEntry {
            id,
            authority,
            slot,
            watcher: Some(watcher),
        });
        metrics::record_idle(table.entries.len());
    }

    /// Number of parked connections.
    pub fn idle_count(&self) -> usize {
        self.table.borrow().entries.len()
    }

    /// Number of parked connections for the URI's authority.
    pub fn idle_count_for(&self, uri: &Uri) -> usize {
        let Ok(authority) = Authority::from_uri(uri) else {
            return 0;
        };
        self.table
            .borrow()
            .entries
            .iter()
            .filter(|entry| entry.authority == authority)
            .count()
    }

    /// Close every parked connection.
    pub fn clear(&self) {
        let entries: Vec<_> = {
            let mut table = self.table.borrow_mut();
            let drained = table.entries.drain(..).collect();
            metrics::record_idle(0);
            drained
        };
        for entry in entries {
            if let Some(watcher) = entry.watcher {
                watcher.abort();
            }
            entry.slot.borrow_mut().take();
        }
    }

    fn claim(&self, authority: &Authority) -> Option<C::Connection> {
        let mut table = self.table.borrow_mut();
        while let Some(id) = table
            .entries
            .iter()
            .find(|entry| entry.authority == *authority)
            .map(|entry| entry.id)
        {
            let Some(mut entry) = table.remove(id) else {
                break;
            };
            if let Some(watcher) = entry.watcher.take() {
                watcher.abort();
            }
            let conn = entry.slot.borrow_mut().take();
            if conn.is_some() {
                return conn;
            }
        }
        None
    }
}

async fn watch<T: Connection>(
    table: Weak<RefCell<IdleTable<T>>>,
    id: u64,
    slot: Slot<T>,
    delay: Duration,
) {
    let reason = tokio::select! {
        _ = tokio::time::sleep(delay) => Eviction::Timeout,
        reason = probe(&slot) => reason,
    };

    if let Some(table) = table.upgrade() {
        evict(&table, id, reason);
    }
}

/// Resolves once the parked connection shows any activity.
fn probe<T: Connection>(slot: &Slot<T>) -> impl Future<Output = Eviction> + '_ {
    poll_fn(move |cx| {
        let mut guard = slot.borrow_mut();
        let Some(conn) = guard.as_mut() else {
            return Poll::Pending;
        };

        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        match Pin::new(conn).poll_read(cx, &mut buf) {
            Poll::Ready(Ok(())) if buf.filled().is_empty() => Poll::Ready(Eviction::Closed),
            Poll::Ready(Ok(())) => Poll::Ready(Eviction::Data),
            Poll::Ready(Err(_)) => Poll::Ready(Eviction::Error),
            Poll::Pending => Poll::Pending,
        }
    })
}

fn evict<T>(table: &RefCell<IdleTable<T>>, id: u64, reason: Eviction) {
    let Some(entry) = table.borrow_mut().remove(id) else {
        return;
    };

    let conn = entry.slot.borrow_mut().take();
    tracing::debug!(
        authority = %entry.authority,
        entry = id,
        reason = reason.as_str(),
        "Evicting idle connection"
    );
    metrics::record_eviction(reason.as_str());
    drop(conn);
}
