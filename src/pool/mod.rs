//! Connection pool subsystem.
//!
//! # Data Flow
//! ```text
//! Request stream needs a connection
//!     → authority.rs (scheme/host/port → canonical key)
//!     → idle.rs (claim a parked connection, or connect)
//!     → ... exchange runs ...
//!     → idle.rs (release: park and watch until reused or evicted)
//! ```
//!
//! # Design Decisions
//! - Reuse is strictly per authority; the path never matters
//! - Idle connections are evicted quickly (1 ms by default) since a parked
//!   connection is only meant to bridge back-to-back requests

pub mod authority;
pub mod idle;

pub use authority::Authority;
pub use idle::ConnectionPool;
