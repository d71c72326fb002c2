//! Shared utilities for integration tests.
//!
//! Connections are in-memory duplex pipes: the engine gets one end, the
//! test plays the server on the other.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use h1_engine::config::{ClientConfig, EngineConfig, PoolConfig};
use h1_engine::{Authority, Client, ConnectionPool, Connector};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Accept,
    Refuse,
    Hang,
}

struct Shared {
    mode: Cell<Mode>,
    connects: Cell<usize>,
    abandoned: Cell<usize>,
    authorities: RefCell<Vec<String>>,
    tx: mpsc::UnboundedSender<DuplexStream>,
}

/// Connector handing out duplex pipes.
pub struct MockConnector {
    shared: Rc<Shared>,
}

/// The server side of every connection the mock opened.
pub struct MockServer {
    shared: Rc<Shared>,
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

pub fn mock() -> (MockConnector, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Rc::new(Shared {
        mode: Cell::new(Mode::Accept),
        connects: Cell::new(0),
        abandoned: Cell::new(0),
        authorities: RefCell::new(Vec::new()),
        tx,
    });
    (
        MockConnector {
            shared: Rc::clone(&shared),
        },
        MockServer { shared, rx },
    )
}

/// Counts connect futures dropped before they resolved.
struct Attempt {
    shared: Rc<Shared>,
    resolved: bool,
}

impl Drop for Attempt {
    fn drop(&mut self) {
        if !self.resolved {
            self.shared.abandoned.set(self.shared.abandoned.get() + 1);
        }
    }
}

impl Connector for MockConnector {
    type Connection = DuplexStream;

    fn connect(&self, authority: &Authority) -> impl Future<Output = io::Result<DuplexStream>> {
        let shared = Rc::clone(&self.shared);
        shared.connects.set(shared.connects.get() + 1);
        shared.authorities.borrow_mut().push(authority.to_string());

        async move {
            let mut attempt = Attempt {
                shared: Rc::clone(&shared),
                resolved: false,
            };
            let result = match shared.mode.get() {
                Mode::Accept => {
                    let (client, server) = tokio::io::duplex(64 * 1024);
                    let _ = shared.tx.send(server);
                    Ok(client)
                }
                Mode::Refuse => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
                Mode::Hang => std::future::pending().await,
            };
            attempt.resolved = true;
            result
        }
    }
}

impl MockServer {
    pub fn set_mode(&self, mode: Mode) {
        self.shared.mode.set(mode);
    }

    /// Next server-side connection.
    pub async fn accept(&mut self) -> DuplexStream {
        self.rx.recv().await.expect("mock connector dropped")
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.get()
    }

    pub fn abandoned(&self) -> usize {
        self.shared.abandoned.get()
    }

    pub fn authorities(&self) -> Vec<String> {
        self.shared.authorities.borrow().clone()
    }
}

pub fn config(idle_eviction_ms: u64) -> EngineConfig {
    EngineConfig {
        pool: PoolConfig { idle_eviction_ms },
        client: ClientConfig::default(),
        ..EngineConfig::default()
    }
}

pub fn pool(idle_eviction_ms: u64) -> (ConnectionPool<MockConnector>, MockServer) {
    let (connector, server) = mock();
    (ConnectionPool::new(connector, &config(idle_eviction_ms).pool), server)
}

pub fn client(config: &EngineConfig) -> (Client<MockConnector>, MockServer) {
    let (connector, server) = mock();
    (Client::new(connector, config), server)
}

/// Run a test body on a local task set.
pub async fn local<F: Future>(f: F) -> F::Output {
    tokio::task::LocalSet::new().run_until(f).await
}

/// Let every runnable task make progress (the test clock is paused, so
/// this only returns once all tasks are idle).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Read a request head; returns it with any bytes read past it.
pub async fn read_head(conn: &mut DuplexStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = buf.split_off(pos + 4);
            return (String::from_utf8(buf).unwrap(), rest);
        }
        let n = conn.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before the request head");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Read exactly `len` more bytes after `already`.
pub async fn read_body(conn: &mut DuplexStream, mut already: Vec<u8>, len: usize) -> Vec<u8> {
    let mut chunk = [0u8; 1024];
    while already.len() < len {
        let n = conn.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before the request body");
        already.extend_from_slice(&chunk[..n]);
    }
    already
}

/// True once the engine side of the pipe has been dropped.
pub async fn is_closed(conn: &mut DuplexStream) -> bool {
    let mut byte = [0u8; 1];
    matches!(conn.read(&mut byte).await, Ok(0))
}
