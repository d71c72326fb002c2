//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! pool / client / limit
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges via the metrics facade)
//! ```
//!
//! # Design Decisions
//! - Structured fields (authority, connection id, slot id) on every event
//! - Metrics are cheap and recorder-agnostic

pub mod logging;
pub mod metrics;
