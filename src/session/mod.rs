//! SMPP session layer: per-connection state, the live registry, and the
//! read/write loop that bridges the wire to the event bus.

mod connection;
mod decision;
mod handler;
mod registry;

pub use connection::{BindRole, Connection, PendingRequest};
pub use decision::{accepted, decision_status};
pub use handler::Session;
pub use registry::ConnectionRegistry;

use crate::proto::CodecError;

/// Per-connection write queue depth; a full queue is the backpressure that
/// pauses whoever produces traffic for the connection.
pub(crate) const OUTBOX_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection closed")]
    Closed,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
