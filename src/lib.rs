//! smpplink: an SMPP session daemon.
//!
//! Accepts inbound peers, dials configured SMSCs, negotiates the bind
//! handshake, and bridges PDUs to an internal event bus. All policy (who
//! may connect, how a message is answered) lives in bus handlers; this
//! crate owns the sockets, the session state machines, and the timers.

pub mod bootstrap;
pub mod bus;
pub mod command;
pub mod config;
pub mod connector;
pub mod listener;
pub mod proto;
pub mod session;
pub mod telemetry;
