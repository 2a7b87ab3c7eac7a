//! Embedded SMPP v3.4 wire protocol support.
//!
//! Covers the PDU set the session layer handles: the three binds and their
//! responses, `submit_sm`/`deliver_sm` and responses, `unbind`/`unbind_resp`,
//! `enquire_link`/`enquire_link_resp` and `generic_nack`. Anything else is
//! carried as an opaque body so an unexpected peer never breaks the stream.

mod codec;
mod pdu;

pub use codec::{CodecError, SmppCodec, MAX_PDU_SIZE};
pub use pdu::{BindBody, BindRespBody, Body, MessageBody, MessageRespBody, Pdu};

use num_enum::TryFromPrimitive;

/// SMPP v3.4 command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
pub enum Command {
    GenericNack = 0x8000_0000,
    BindReceiver = 0x0000_0001,
    BindReceiverResp = 0x8000_0001,
    BindTransmitter = 0x0000_0002,
    BindTransmitterResp = 0x8000_0002,
    QuerySm = 0x0000_0003,
    QuerySmResp = 0x8000_0003,
    SubmitSm = 0x0000_0004,
    SubmitSmResp = 0x8000_0004,
    DeliverSm = 0x0000_0005,
    DeliverSmResp = 0x8000_0005,
    Unbind = 0x0000_0006,
    UnbindResp = 0x8000_0006,
    ReplaceSm = 0x0000_0007,
    ReplaceSmResp = 0x8000_0007,
    CancelSm = 0x0000_0008,
    CancelSmResp = 0x8000_0008,
    BindTransceiver = 0x0000_0009,
    BindTransceiverResp = 0x8000_0009,
    Outbind = 0x0000_000B,
    EnquireLink = 0x0000_0015,
    EnquireLinkResp = 0x8000_0015,
    SubmitMulti = 0x0000_0021,
    SubmitMultiResp = 0x8000_0021,
    AlertNotification = 0x0000_0102,
    DataSm = 0x0000_0103,
    DataSmResp = 0x8000_0103,
}

impl Command {
    /// Wire name of the command, as used in event names (`smpp.<name>`).
    pub fn name(&self) -> &'static str {
        match self {
            Command::GenericNack => "generic_nack",
            Command::BindReceiver => "bind_receiver",
            Command::BindReceiverResp => "bind_receiver_resp",
            Command::BindTransmitter => "bind_transmitter",
            Command::BindTransmitterResp => "bind_transmitter_resp",
            Command::QuerySm => "query_sm",
            Command::QuerySmResp => "query_sm_resp",
            Command::SubmitSm => "submit_sm",
            Command::SubmitSmResp => "submit_sm_resp",
            Command::DeliverSm => "deliver_sm",
            Command::DeliverSmResp => "deliver_sm_resp",
            Command::Unbind => "unbind",
            Command::UnbindResp => "unbind_resp",
            Command::ReplaceSm => "replace_sm",
            Command::ReplaceSmResp => "replace_sm_resp",
            Command::CancelSm => "cancel_sm",
            Command::CancelSmResp => "cancel_sm_resp",
            Command::BindTransceiver => "bind_transceiver",
            Command::BindTransceiverResp => "bind_transceiver_resp",
            Command::Outbind => "outbind",
            Command::EnquireLink => "enquire_link",
            Command::EnquireLinkResp => "enquire_link_resp",
            Command::SubmitMulti => "submit_multi",
            Command::SubmitMultiResp => "submit_multi_resp",
            Command::AlertNotification => "alert_notification",
            Command::DataSm => "data_sm",
            Command::DataSmResp => "data_sm_resp",
        }
    }

    /// Parse a wire name back to a command.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "generic_nack" => Command::GenericNack,
            "bind_receiver" => Command::BindReceiver,
            "bind_receiver_resp" => Command::BindReceiverResp,
            "bind_transmitter" => Command::BindTransmitter,
            "bind_transmitter_resp" => Command::BindTransmitterResp,
            "query_sm" => Command::QuerySm,
            "query_sm_resp" => Command::QuerySmResp,
            "submit_sm" => Command::SubmitSm,
            "submit_sm_resp" => Command::SubmitSmResp,
            "deliver_sm" => Command::DeliverSm,
            "deliver_sm_resp" => Command::DeliverSmResp,
            "unbind" => Command::Unbind,
            "unbind_resp" => Command::UnbindResp,
            "replace_sm" => Command::ReplaceSm,
            "replace_sm_resp" => Command::ReplaceSmResp,
            "cancel_sm" => Command::CancelSm,
            "cancel_sm_resp" => Command::CancelSmResp,
            "bind_transceiver" => Command::BindTransceiver,
            "bind_transceiver_resp" => Command::BindTransceiverResp,
            "outbind" => Command::Outbind,
            "enquire_link" => Command::EnquireLink,
            "enquire_link_resp" => Command::EnquireLinkResp,
            "submit_multi" => Command::SubmitMulti,
            "submit_multi_resp" => Command::SubmitMultiResp,
            "alert_notification" => Command::AlertNotification,
            "data_sm" => Command::DataSm,
            "data_sm_resp" => Command::DataSmResp,
            _ => return None,
        })
    }

    /// Check if this command id represents a response PDU.
    pub fn is_response(&self) -> bool {
        (*self as u32) & 0x8000_0000 != 0
    }

    /// The response command paired with this request, if one exists.
    pub fn response(&self) -> Option<Command> {
        if self.is_response() {
            return None;
        }
        Command::try_from(*self as u32 | 0x8000_0000).ok()
    }
}

/// SMPP command status codes (the `ESME_R*` enumeration), subset used by the
/// session layer. Acknowledgements carry the raw `u32` so externally decided
/// statuses pass through verbatim; this enum names the ones we produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum Status {
    /// ESME_ROK
    Ok = 0x0000_0000,
    /// ESME_RINVMSGLEN
    InvalidMsgLength = 0x0000_0001,
    /// ESME_RINVCMDLEN
    InvalidCommandLength = 0x0000_0002,
    /// ESME_RINVCMDID
    InvalidCommandId = 0x0000_0003,
    /// ESME_RINVBNDSTS
    IncorrectBindStatus = 0x0000_0004,
    /// ESME_RALYBND
    AlreadyBound = 0x0000_0005,
    /// ESME_RSYSERR
    SystemError = 0x0000_0008,
    /// ESME_RBINDFAIL
    BindFailed = 0x0000_000D,
    /// ESME_RINVPASWD
    InvalidPassword = 0x0000_000E,
    /// ESME_RINVSYSID
    InvalidSystemId = 0x0000_000F,
    /// ESME_RMSGQFUL
    MessageQueueFull = 0x0000_0014,
    /// ESME_RSUBMITFAIL
    SubmitFailed = 0x0000_0045,
    /// ESME_RTHROTTLED
    ThrottlingError = 0x0000_0058,
    /// ESME_RDELIVERYFAILURE
    DeliveryFailed = 0x0000_00FE,
    /// ESME_RUNKNOWNERR
    UnknownError = 0x0000_00FF,
}

impl Status {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}
