//! Server-side concurrency limiting.
//!
//! # Data Flow
//! ```text
//! Request
//!     → layer.rs (ConcurrencyLimit::call)
//!         ├─ slot free: invoke handler now
//!         └─ full: buffer.rs (pause streaming body)
//!                  → limiter.rs (queue, wait for hand-off)
//!                  → invoke handler, resume body
//!     → handler finishes (any way) → Permit dropped → next in queue
//! ```
//!
//! # Design Decisions
//! - Built as a tower `Layer` so it composes with any request handler
//! - Single-threaded: state is `Rc<RefCell<_>>` and futures are `!Send`

pub mod buffer;
pub mod layer;
pub mod limiter;

pub use buffer::{pause_body, PauseBuffer, Resume};
pub use layer::{ConcurrencyLimit, ConcurrencyLimitLayer, ResponseFuture};
pub use limiter::{Canceller, ConcurrencyLimiter, Permit, Ticket};
