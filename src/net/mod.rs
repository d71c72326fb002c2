//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Authority (from the pool)
//!     → connector.rs (open a duplex stream, optional timeout)
//!     → connection.rs (identity, readability tracking)
//!     → Hand off to the request stream driver
//! ```
//!
//! # Design Decisions
//! - Connections are anything that is `AsyncRead + AsyncWrite`, so tests
//!   can drive the engine over in-memory pipes
//! - Closing a connection is dropping it

pub mod connection;
pub mod connector;

pub use connection::{Connection, ConnectionId, Tracked};
pub use connector::{Connector, TcpConnector};
