//! Command surface on the bus: the SMPP operation handlers (`smpp.*`) and
//! the operator control queries (`bus.status`, `bus.command`).

mod control;
mod error;
mod router;

pub use control::ControlHandler;
pub use error::ErrorKind;
pub use router::SmppHandler;

use std::sync::Arc;

use crate::bootstrap::SharedServerState;

/// Event names the SMPP handler answers. Incoming traffic shares these
/// names; the handler only acts on outgoing or undirected submissions.
pub const SMPP_EVENTS: &[&str] = &[
    "smpp.listen",
    "smpp.unlisten",
    "smpp.connect",
    "smpp.disconnect",
    "smpp.bind_transmitter",
    "smpp.bind_receiver",
    "smpp.bind_transceiver",
    "smpp.bind_transmitter_resp",
    "smpp.bind_receiver_resp",
    "smpp.bind_transceiver_resp",
    "smpp.submit_sm",
    "smpp.submit_sm_resp",
    "smpp.deliver_sm",
    "smpp.deliver_sm_resp",
    "smpp.unbind",
    "smpp.unbind_resp",
    "smpp.enquire_link",
    "smpp.generic_nack",
];

/// Wire the command handlers into the bus.
pub fn install(state: &SharedServerState) {
    let smpp = Arc::new(SmppHandler::new(state.clone()));
    for name in SMPP_EVENTS {
        state.bus.install(name, smpp.clone());
    }

    let control = Arc::new(ControlHandler::new(state.clone()));
    state.bus.install("bus.status", control.clone());
    state.bus.install("bus.command", control);
}
