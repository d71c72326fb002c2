//! Concurrency limiting of request handlers.

use std::cell::RefCell;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use bytes::Bytes;
use h1_engine::{Body, ConcurrencyLimitLayer, ConcurrencyLimiter, Error};
use http::Request;
use tokio::sync::Semaphore;
use tower::{BoxError, Layer, Service, ServiceExt};

mod common;

use common::{local, settle};

/// Handler state: the order handlers started in, and a gate they wait on.
#[derive(Clone)]
struct Probe {
    started: Rc<RefCell<Vec<String>>>,
    gate: Rc<Semaphore>,
}

impl Probe {
    fn new() -> Self {
        Self {
            started: Rc::new(RefCell::new(Vec::new())),
            gate: Rc::new(Semaphore::new(0)),
        }
    }

    fn started(&self) -> Vec<String> {
        self.started.borrow().clone()
    }

    /// Let the oldest waiting handler finish.
    fn release_one(&self) {
        self.gate.add_permits(1);
    }
}

fn request(id: &str, body: Body) -> Request<Body> {
    Request::builder().header("x-id", id).body(body).unwrap()
}

fn id(request: &Request<Body>) -> String {
    request.headers()["x-id"].to_str().unwrap().to_string()
}

/// Records each request, waits on the gate, then echoes the body.
/// A request with id `boom` panics inside `call`.
#[derive(Clone)]
struct Gated {
    probe: Probe,
}

fn gated(probe: &Probe) -> Gated {
    Gated {
        probe: probe.clone(),
    }
}

impl Service<Request<Body>> for Gated {
    type Response = Bytes;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Bytes, Error>>>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let id = id(&request);
        if id == "boom" {
            panic!("handler exploded");
        }
        self.probe.started.borrow_mut().push(id);
        let gate = Rc::clone(&self.probe.gate);
        Box::pin(async move {
            gate.acquire().await.unwrap().forget();
            request.into_body().collect().await
        })
    }
}

async fn spawn_call<S>(svc: &mut S, request: Request<Body>) -> tokio::task::JoinHandle<Result<Bytes, BoxError>>
where
    S: Service<Request<Body>, Response = Bytes, Error = BoxError>,
    S::Future: 'static,
{
    let future = svc.ready().await.unwrap().call(request);
    tokio::task::spawn_local(future)
}

#[tokio::test(start_paused = true)]
async fn admits_up_to_limit_and_hands_off() {
    local(async {
        let probe = Probe::new();
        let limiter = ConcurrencyLimiter::new(2);
        let mut svc = ConcurrencyLimitLayer::with_limiter(limiter.clone()).layer(gated(&probe));

        let mut handles = Vec::new();
        for id in ["a", "b", "c", "d"] {
            handles.push(spawn_call(&mut svc, request(id, Body::empty())).await);
        }
        settle().await;
        assert_eq!(probe.started(), ["a", "b"]);
        assert_eq!(limiter.pending(), 2);
        assert_eq!(limiter.queued(), 2);

        probe.release_one();
        settle().await;
        assert_eq!(probe.started(), ["a", "b", "c"]);
        assert_eq!(limiter.pending(), 2);
        assert_eq!(limiter.queued(), 1);

        for _ in 0..3 {
            probe.release_one();
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(probe.started(), ["a", "b", "c", "d"]);
        assert_eq!(limiter.pending(), 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn cancelled_request_is_skipped() {
    local(async {
        let probe = Probe::new();
        let limiter = ConcurrencyLimiter::new(1);
        let mut svc = ConcurrencyLimitLayer::with_limiter(limiter.clone()).layer(gated(&probe));

        let a = svc.ready().await.unwrap().call(request("a", Body::empty()));
        assert!(a.canceller().is_none());
        let b = svc.ready().await.unwrap().call(request("b", Body::empty()));
        let c = svc.ready().await.unwrap().call(request("c", Body::empty()));
        let d = svc.ready().await.unwrap().call(request("d", Body::empty()));
        assert!(c.is_queued());

        let canceller = c.canceller().unwrap();
        assert!(canceller.cancel());
        let err = c.await.unwrap_err();
        assert!(err.downcast_ref::<Error>().unwrap().is_cancelled());
        assert_eq!(err.to_string(), "cancelled queued handler");
        assert_eq!(limiter.queued(), 2);

        let a = tokio::task::spawn_local(a);
        let b = tokio::task::spawn_local(b);
        let d = tokio::task::spawn_local(d);
        for _ in 0..3 {
            probe.release_one();
        }
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        d.await.unwrap().unwrap();

        assert_eq!(probe.started(), ["a", "b", "d"]);
        assert!(!canceller.cancel());
        assert_eq!(limiter.pending(), 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn dropped_queued_future_leaves_queue() {
    local(async {
        let probe = Probe::new();
        let limiter = ConcurrencyLimiter::new(1);
        let mut svc = ConcurrencyLimitLayer::with_limiter(limiter.clone()).layer(gated(&probe));

        let running = spawn_call(&mut svc, request("a", Body::empty())).await;
        let queued = svc.ready().await.unwrap().call(request("b", Body::empty()));
        assert_eq!(limiter.queued(), 1);
        drop(queued);
        assert_eq!(limiter.queued(), 0);

        probe.release_one();
        running.await.unwrap().unwrap();
        assert_eq!(limiter.pending(), 0);
        assert_eq!(probe.started(), ["a"]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn synchronous_panic_frees_slot() {
    local(async {
        let limiter = ConcurrencyLimiter::new(1);
        let panicking = tower::service_fn(|request: Request<Body>| {
            if id(&request) == "boom" {
                panic!("handler exploded");
            }
            async { Ok::<_, Infallible>(Bytes::new()) }
        });
        let mut svc = ConcurrencyLimitLayer::with_limiter(limiter.clone()).layer(panicking);

        svc.ready().await.unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            svc.call(request("boom", Body::empty()))
        }));
        assert!(outcome.is_err());
        assert_eq!(limiter.pending(), 0);

        let ok = svc.ready().await.unwrap().call(request("fine", Body::empty()));
        assert!(ok.canceller().is_none());
        ok.await.unwrap();
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn queued_handler_panic_frees_slot() {
    local(async {
        let probe = Probe::new();
        let limiter = ConcurrencyLimiter::new(1);
        let mut svc = ConcurrencyLimitLayer::with_limiter(limiter.clone()).layer(gated(&probe));

        let first = spawn_call(&mut svc, request("a", Body::empty())).await;
        let boom = spawn_call(&mut svc, request("boom", Body::empty())).await;
        let last = spawn_call(&mut svc, request("c", Body::empty())).await;
        settle().await;

        probe.release_one();
        first.await.unwrap().unwrap();
        assert!(boom.await.unwrap_err().is_panic());

        probe.release_one();
        last.await.unwrap().unwrap();
        assert_eq!(probe.started(), ["a", "c"]);
        assert_eq!(limiter.pending(), 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn handler_error_frees_slot() {
    local(async {
        let limiter = ConcurrencyLimiter::new(1);
        let failing = tower::service_fn(|_request: Request<Body>| async {
            Err::<Bytes, _>(Error::Cancelled("handler gave up"))
        });
        let mut svc = ConcurrencyLimitLayer::with_limiter(limiter.clone()).layer(failing);

        let err = svc
            .ready()
            .await
            .unwrap()
            .call(request("a", Body::empty()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "handler gave up");
        assert_eq!(limiter.pending(), 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn queued_streaming_body_is_replayed() {
    local(async {
        let probe = Probe::new();
        let limiter = ConcurrencyLimiter::new(1);
        let mut svc = ConcurrencyLimitLayer::with_limiter(limiter.clone()).layer(gated(&probe));

        let first = spawn_call(&mut svc, request("a", Body::empty())).await;

        let (tx, body) = Body::channel(Some(6));
        let queued = spawn_call(&mut svc, request("b", body)).await;
        tx.send("ab");
        tx.send("cd");
        settle().await;
        assert_eq!(probe.started(), ["a"]);

        probe.release_one();
        first.await.unwrap().unwrap();
        settle().await;
        assert_eq!(probe.started(), ["a", "b"]);

        tx.send("ef");
        drop(tx);
        probe.release_one();
        assert_eq!(queued.await.unwrap().unwrap(), "abcdef");
    })
    .await;
}
