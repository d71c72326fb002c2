//! Connection pool reuse and idle eviction.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use h1_engine::config::PoolConfig;
use h1_engine::{Authority, ConnectionPool, Connector};
use http::Uri;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

mod common;

use common::{is_closed, local, pool, settle, Mode};

fn uri(s: &str) -> Uri {
    s.parse().unwrap()
}

#[tokio::test(start_paused = true)]
async fn reuses_connection_for_same_authority() {
    local(async {
        let (pool, server) = pool(60_000);

        let conn = pool.acquire(&uri("http://example.com/a")).await.unwrap();
        pool.release(&uri("http://example.com/a"), conn).unwrap();
        assert_eq!(pool.idle_count(), 1);

        let _conn = pool.acquire(&uri("http://example.com/b?q=1")).await.unwrap();
        assert_eq!(server.connects(), 1);
        assert_eq!(pool.idle_count(), 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn authorities_are_kept_apart() {
    local(async {
        let (pool, server) = pool(60_000);

        let conn = pool.acquire(&uri("http://example.com/")).await.unwrap();
        pool.release(&uri("http://example.com/"), conn).unwrap();

        let _other_port = pool.acquire(&uri("http://example.com:8080/")).await.unwrap();
        let _tls = pool.acquire(&uri("https://example.com:80/")).await.unwrap();

        assert_eq!(server.connects(), 3);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.idle_count_for(&uri("http://example.com:80/x")), 1);
        assert_eq!(
            server.authorities(),
            vec!["example.com:80", "example.com:8080", "tls://example.com:80"]
        );
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn evicts_after_idle_delay() {
    local(async {
        let (pool, mut server) = pool(1);

        let conn = pool.acquire(&uri("http://example.com/")).await.unwrap();
        let mut peer = server.accept().await;
        pool.release(&uri("http://example.com/"), conn).unwrap();
        assert_eq!(pool.idle_count(), 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(pool.idle_count(), 0);
        assert!(is_closed(&mut peer).await);

        pool.acquire(&uri("http://example.com/")).await.unwrap();
        assert_eq!(server.connects(), 2);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn evicts_on_unsolicited_data() {
    local(async {
        let (pool, mut server) = pool(60_000);

        let conn = pool.acquire(&uri("http://example.com/")).await.unwrap();
        let mut peer = server.accept().await;
        pool.release(&uri("http://example.com/"), conn).unwrap();

        peer.write_all(b"surprise").await.unwrap();
        settle().await;

        assert_eq!(pool.idle_count(), 0);
        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn evicts_when_peer_closes() {
    local(async {
        let (pool, mut server) = pool(60_000);

        let conn = pool.acquire(&uri("http://example.com/")).await.unwrap();
        let peer = server.accept().await;
        pool.release(&uri("http://example.com/"), conn).unwrap();

        drop(peer);
        settle().await;
        assert_eq!(pool.idle_count(), 0);
    })
    .await;
}

/// Trips every connection it hands out into a read error.
#[derive(Default)]
struct Fault {
    tripped: Cell<bool>,
    readers: RefCell<Vec<Waker>>,
    connects: Cell<usize>,
}

impl Fault {
    fn trip(&self) {
        self.tripped.set(true);
        for waker in self.readers.borrow_mut().drain(..) {
            waker.wake();
        }
    }
}

struct FaultyConnection {
    fault: Rc<Fault>,
}

impl AsyncRead for FaultyConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fault.tripped.get() {
            return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
        }
        self.fault.readers.borrow_mut().push(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for FaultyConnection {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

struct FaultyConnector {
    fault: Rc<Fault>,
}

impl Connector for FaultyConnector {
    type Connection = FaultyConnection;

    fn connect(&self, _authority: &Authority) -> impl Future<Output = io::Result<FaultyConnection>> {
        self.fault.connects.set(self.fault.connects.get() + 1);
        let fault = Rc::clone(&self.fault);
        async move { Ok(FaultyConnection { fault }) }
    }
}

#[tokio::test(start_paused = true)]
async fn evicts_on_read_error() {
    local(async {
        let fault = Rc::new(Fault::default());
        let connector = FaultyConnector {
            fault: Rc::clone(&fault),
        };
        let pool = ConnectionPool::new(
            connector,
            &PoolConfig {
                idle_eviction_ms: 60_000,
            },
        );

        let conn = pool.acquire(&uri("http://example.com/")).await.unwrap();
        pool.release(&uri("http://example.com/"), conn).unwrap();
        settle().await;
        assert_eq!(pool.idle_count(), 1);

        fault.trip();
        settle().await;
        assert_eq!(pool.idle_count(), 0);

        let _conn = pool.acquire(&uri("http://example.com/")).await.unwrap();
        assert_eq!(fault.connects.get(), 2);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn claimed_connection_is_not_evicted() {
    local(async {
        let (pool, mut server) = pool(1);

        let conn = pool.acquire(&uri("http://example.com/")).await.unwrap();
        let mut peer = server.accept().await;
        pool.release(&uri("http://example.com/"), conn).unwrap();
        let mut conn = pool.acquire(&uri("http://example.com/")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        peer.write_all(b"still here").await.unwrap();
        let mut buf = [0u8; 10];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"still here");
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn release_rejects_unsupported_scheme() {
    local(async {
        let (pool, _server) = pool(60_000);
        let (conn, _peer) = tokio::io::duplex(64);
        let err = pool.release(&uri("ftp://example.com/"), conn).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(pool.idle_count(), 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn connect_failure_surfaces() {
    local(async {
        let (pool, server) = pool(60_000);
        server.set_mode(Mode::Refuse);
        let err = pool.acquire(&uri("http://example.com/")).await.unwrap_err();
        assert!(matches!(err, h1_engine::Error::Io(_)));
    })
    .await;
}
