//! HTTP/1.x wire protocol.
//!
//! # Data Flow
//! ```text
//! RequestHead
//!     → head.rs (serialize + validate) → bytes on the wire
//!
//! bytes from the wire
//!     → head.rs (find terminator, parse status line and headers)
//!     → framing.rs (which body framing applies)
//!     → decode.rs (incremental body decoding)
//!     → headers.rs (persistence decision)
//! ```
//!
//! Everything here is sans-io: functions take and return buffers.

pub mod decode;
pub mod framing;
pub mod head;
pub mod headers;

pub use decode::{Decoded, Decoder};
pub use framing::BodyLength;
pub use head::{ReasonPhrase, ResponseHead};
