//! HTTP/1.x client subsystem.
//!
//! # Data Flow
//! ```text
//! Client::request(head)
//!     → stream.rs (RequestStream handle + driver task)
//!     → exchange.rs (state machine, reuse decision)
//!     → incoming.rs (response body, connection hand-back)
//!     → pool (release or close)
//! ```
//!
//! # Design Decisions
//! - One request per connection at a time; no pipelining
//! - Everything runs on a single-threaded local task set

pub mod exchange;
mod incoming;
pub mod request;
pub mod stream;

use bytes::Bytes;
use http::Response;

use crate::body::Body;
use crate::config::{ClientConfig, EngineConfig};
use crate::error::Result;
use crate::net::Connector;
use crate::pool::ConnectionPool;

pub use exchange::State;
pub use request::RequestHead;
pub use stream::RequestStream;

/// Issues requests over pooled connections.
pub struct Client<C: Connector> {
    pool: ConnectionPool<C>,
    config: ClientConfig,
}

impl<C: Connector> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: Connector> Client<C> {
    /// Create a new client with its own pool.
    pub fn new(connector: C, config: &EngineConfig) -> Self {
        Self {
            pool: ConnectionPool::new(connector, &config.pool),
            config: config.client.clone(),
        }
    }

    /// Create a client sharing an existing pool.
    pub fn with_pool(pool: ConnectionPool<C>, config: ClientConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Open a request stream. Nothing is sent until it is written to or
    /// ended.
    pub fn request(&self, head: RequestHead) -> RequestStream {
        RequestStream::new(head, self.pool.clone(), &self.config)
    }

    /// Send a complete request and wait for the response head.
    ///
    /// A `Content-Length` header is added for non-empty bodies that do not
    /// declare one.
    pub async fn send(&self, mut head: RequestHead, body: impl Into<Bytes>) -> Result<Response<Body>> {
        let body = body.into();
        if !body.is_empty()
            && head.header_value("content-length").is_none()
            && head.header_value("transfer-encoding").is_none()
        {
            head.set_header("Content-Length", body.len().to_string());
        }

        let mut stream = self.request(head);
        stream.end(if body.is_empty() { None } else { Some(body) });
        stream.response().await
    }
}
