//! HTTP/1.x engine for a single-threaded event loop.
//!
//! # Architecture Overview
//!
//! ```text
//!     Outbound                                         Inbound
//!     ────────                                         ───────
//!  Client::request(head)                           Request<Body>
//!        │                                               │
//!        ▼                                               ▼
//!  ┌──────────────┐    ┌──────────────┐           ┌──────────────┐
//!  │    client    │───▶│     pool     │           │    limit     │
//!  │ RequestStream│◀───│ idle reuse + │           │ admission +  │
//!  │  + exchange  │    │   eviction   │           │ FIFO queue   │
//!  └──────┬───────┘    └──────┬───────┘           └──────┬───────┘
//!         │                   │                          │
//!         ▼                   ▼                          ▼
//!  ┌──────────────┐    ┌──────────────┐               handler
//!  │    proto     │    │     net      │
//!  │ heads, body  │    │  connector   │
//!  │   framing    │    │ + tracking   │
//!  └──────────────┘    └──────────────┘
//!
//!  Cross-cutting: config, observability (tracing + metrics), error
//! ```
//!
//! All types are `!Send` and must run on a [`tokio::task::LocalSet`].

// Outbound side
pub mod client;
pub mod net;
pub mod pool;
pub mod proto;

// Inbound side
pub mod limit;

// Shared
pub mod body;
pub mod config;
pub mod error;
pub mod observability;

pub use body::{Body, BodySender};
pub use client::{Client, RequestHead, RequestStream};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use limit::{ConcurrencyLimit, ConcurrencyLimitLayer, ConcurrencyLimiter};
pub use net::{Connector, TcpConnector};
pub use pool::{Authority, ConnectionPool};
