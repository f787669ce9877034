//! # warren-wire: the framed protocol surface
//!
//! Everything that crosses a socket in Warren is a length-prefixed
//! postcard frame:
//!
//! - API traffic ([`Request`] / [`Response`], plus [`WatchEvent`] frames on
//!   a watch stream) between clients, workers, and managers.
//! - Consensus traffic between managers (the `warren-vsr` message types,
//!   framed by the same codec).
//!
//! The replicated-log envelope ([`CommandEnvelope`]) also lives here: a
//! stable `{schema_version, kind, payload}` wrapper around the typed
//! command, so the durable log and future migrations have a fixed outer
//! shape regardless of how the command set grows (additions only, at the
//! end, never renumbered).

mod codec;
mod envelope;
mod messages;

pub use codec::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE, WireError, read_frame, write_frame};
pub use envelope::{CommandEnvelope, SCHEMA_VERSION};
pub use messages::{Request, Response, WatchEvent};

/// Result alias for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
