use bytes::Bytes;
use serde_json::{Map, Value};

use super::{Command, Status};

/// A single protocol data unit. `command` and `status` stay raw `u32`s so
/// unknown command ids and externally decided statuses pass through the
/// session layer untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub command: u32,
    pub status: u32,
    pub sequence: u32,
    pub body: Body,
}

/// PDU body variants. Unknown or unparsed bodies are carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Bind(BindBody),
    BindResp(BindRespBody),
    Message(MessageBody),
    MessageResp(MessageRespBody),
    Empty,
    Opaque(Bytes),
}

/// Mandatory fields of `bind_transmitter`, `bind_receiver` and
/// `bind_transceiver`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindBody {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub interface_version: u8,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

/// Mandatory fields of the bind responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindRespBody {
    pub system_id: String,
}

/// Mandatory fields shared by `submit_sm` and `deliver_sm`. Optional TLVs
/// after the short message are preserved opaquely and re-emitted verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBody {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub destination_addr: String,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Bytes,
    pub tlvs: Bytes,
}

/// Mandatory field of `submit_sm_resp` and `deliver_sm_resp`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageRespBody {
    pub message_id: String,
}

impl Pdu {
    pub fn new(command: Command, status: u32, sequence: u32, body: Body) -> Self {
        Self {
            command: command as u32,
            status,
            sequence,
            body,
        }
    }

    /// The known command this PDU carries, if its id is recognised.
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }

    pub fn generic_nack(status: u32, sequence: u32) -> Self {
        Self::new(Command::GenericNack, status, sequence, Body::Empty)
    }

    pub fn enquire_link_resp(sequence: u32) -> Self {
        Self::new(Command::EnquireLinkResp, 0, sequence, Body::Empty)
    }

    pub fn unbind(sequence: u32) -> Self {
        Self::new(Command::Unbind, 0, sequence, Body::Empty)
    }

    pub fn unbind_resp(status: u32, sequence: u32) -> Self {
        Self::new(Command::UnbindResp, status, sequence, Body::Empty)
    }

    /// Response to a bind request. The response body is only included on
    /// success, mirroring how most SMSCs answer a failed bind.
    pub fn bind_resp(request: Command, status: u32, sequence: u32, system_id: &str) -> Self {
        let command = request.response().unwrap_or(Command::GenericNack);
        let body = if status == 0 {
            Body::BindResp(BindRespBody {
                system_id: system_id.to_string(),
            })
        } else {
            Body::Empty
        };
        Self {
            command: command as u32,
            status,
            sequence,
            body,
        }
    }

    /// Response to a submit_sm or deliver_sm request.
    pub fn message_resp(request: Command, status: u32, sequence: u32, message_id: &str) -> Self {
        let command = request.response().unwrap_or(Command::GenericNack);
        Self {
            command: command as u32,
            status,
            sequence,
            body: Body::MessageResp(MessageRespBody {
                message_id: message_id.to_string(),
            }),
        }
    }

    /// Flatten the PDU into a field map for the event bus. Binary payloads
    /// (short message, TLVs) are hex-encoded.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("sequence_number".into(), Value::from(self.sequence));
        fields.insert("command_status".into(), Value::from(self.status));
        match &self.body {
            Body::Bind(bind) => {
                fields.insert("system_id".into(), Value::from(bind.system_id.clone()));
                fields.insert("password".into(), Value::from(bind.password.clone()));
                fields.insert("system_type".into(), Value::from(bind.system_type.clone()));
                fields.insert(
                    "interface_version".into(),
                    Value::from(bind.interface_version),
                );
                fields.insert("addr_ton".into(), Value::from(bind.addr_ton));
                fields.insert("addr_npi".into(), Value::from(bind.addr_npi));
                fields.insert(
                    "address_range".into(),
                    Value::from(bind.address_range.clone()),
                );
            }
            Body::BindResp(resp) => {
                fields.insert("system_id".into(), Value::from(resp.system_id.clone()));
            }
            Body::Message(msg) => {
                fields.insert("service_type".into(), Value::from(msg.service_type.clone()));
                fields.insert("source_addr_ton".into(), Value::from(msg.source_addr_ton));
                fields.insert("source_addr_npi".into(), Value::from(msg.source_addr_npi));
                fields.insert("source_addr".into(), Value::from(msg.source_addr.clone()));
                fields.insert("dest_addr_ton".into(), Value::from(msg.dest_addr_ton));
                fields.insert("dest_addr_npi".into(), Value::from(msg.dest_addr_npi));
                fields.insert(
                    "destination_addr".into(),
                    Value::from(msg.destination_addr.clone()),
                );
                fields.insert("esm_class".into(), Value::from(msg.esm_class));
                fields.insert("protocol_id".into(), Value::from(msg.protocol_id));
                fields.insert("priority_flag".into(), Value::from(msg.priority_flag));
                fields.insert(
                    "schedule_delivery_time".into(),
                    Value::from(msg.schedule_delivery_time.clone()),
                );
                fields.insert(
                    "validity_period".into(),
                    Value::from(msg.validity_period.clone()),
                );
                fields.insert(
                    "registered_delivery".into(),
                    Value::from(msg.registered_delivery),
                );
                fields.insert(
                    "replace_if_present_flag".into(),
                    Value::from(msg.replace_if_present_flag),
                );
                fields.insert("data_coding".into(), Value::from(msg.data_coding));
                fields.insert(
                    "sm_default_msg_id".into(),
                    Value::from(msg.sm_default_msg_id),
                );
                fields.insert(
                    "short_message".into(),
                    Value::from(hex_encode(&msg.short_message)),
                );
                if !msg.tlvs.is_empty() {
                    fields.insert("tlvs".into(), Value::from(hex_encode(&msg.tlvs)));
                }
            }
            Body::MessageResp(resp) => {
                fields.insert("message_id".into(), Value::from(resp.message_id.clone()));
            }
            Body::Empty => {}
            Body::Opaque(raw) => {
                fields.insert("command_id".into(), Value::from(self.command));
                if !raw.is_empty() {
                    fields.insert("body".into(), Value::from(hex_encode(raw)));
                }
            }
        }
        fields
    }

    /// Build a PDU from an event field map, for outbound traffic requested
    /// over the bus. Missing fields take protocol defaults.
    pub fn from_fields(command: Command, fields: &Map<String, Value>, sequence: u32) -> Self {
        let status = get_u32(fields, "command_status").unwrap_or(0);
        let body = match command {
            Command::BindTransmitter | Command::BindReceiver | Command::BindTransceiver => {
                Body::Bind(BindBody {
                    system_id: get_str(fields, "system_id"),
                    password: get_str(fields, "password"),
                    system_type: get_str(fields, "system_type"),
                    interface_version: get_u8(fields, "interface_version").unwrap_or(0x34),
                    addr_ton: get_u8(fields, "addr_ton").unwrap_or(0),
                    addr_npi: get_u8(fields, "addr_npi").unwrap_or(0),
                    address_range: get_str(fields, "address_range"),
                })
            }
            Command::BindTransmitterResp
            | Command::BindReceiverResp
            | Command::BindTransceiverResp => Body::BindResp(BindRespBody {
                system_id: get_str(fields, "system_id"),
            }),
            Command::SubmitSm | Command::DeliverSm => Body::Message(MessageBody {
                service_type: get_str(fields, "service_type"),
                source_addr_ton: get_u8(fields, "source_addr_ton").unwrap_or(0),
                source_addr_npi: get_u8(fields, "source_addr_npi").unwrap_or(0),
                source_addr: get_str(fields, "source_addr"),
                dest_addr_ton: get_u8(fields, "dest_addr_ton").unwrap_or(0),
                dest_addr_npi: get_u8(fields, "dest_addr_npi").unwrap_or(0),
                destination_addr: get_str(fields, "destination_addr"),
                esm_class: get_u8(fields, "esm_class").unwrap_or(0),
                protocol_id: get_u8(fields, "protocol_id").unwrap_or(0),
                priority_flag: get_u8(fields, "priority_flag").unwrap_or(0),
                schedule_delivery_time: get_str(fields, "schedule_delivery_time"),
                validity_period: get_str(fields, "validity_period"),
                registered_delivery: get_u8(fields, "registered_delivery").unwrap_or(0),
                replace_if_present_flag: get_u8(fields, "replace_if_present_flag").unwrap_or(0),
                data_coding: get_u8(fields, "data_coding").unwrap_or(0),
                sm_default_msg_id: get_u8(fields, "sm_default_msg_id").unwrap_or(0),
                short_message: get_hex(fields, "short_message"),
                tlvs: get_hex(fields, "tlvs"),
            }),
            Command::SubmitSmResp | Command::DeliverSmResp => {
                Body::MessageResp(MessageRespBody {
                    message_id: get_str(fields, "message_id"),
                })
            }
            _ => Body::Empty,
        };
        Self {
            command: command as u32,
            status,
            sequence,
            body,
        }
    }

    /// Default failure status for a request that is nacked without an
    /// external decision providing one.
    pub fn failure_status(command: Command) -> u32 {
        match command {
            Command::BindTransmitter | Command::BindReceiver | Command::BindTransceiver => {
                Status::BindFailed.as_u32()
            }
            Command::SubmitSm => Status::SubmitFailed.as_u32(),
            Command::DeliverSm => Status::DeliveryFailed.as_u32(),
            _ => Status::UnknownError.as_u32(),
        }
    }
}

fn get_str(fields: &Map<String, Value>, key: &str) -> String {
    fields
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn get_u32(fields: &Map<String, Value>, key: &str) -> Option<u32> {
    fields.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

fn get_u8(fields: &Map<String, Value>, key: &str) -> Option<u8> {
    fields.get(key).and_then(Value::as_u64).map(|v| v as u8)
}

fn get_hex(fields: &Map<String, Value>, key: &str) -> Bytes {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(hex_decode)
        .unwrap_or_default()
}

fn hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn hex_decode(text: &str) -> Bytes {
    let mut out = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        let hi = (bytes[i] as char).to_digit(16);
        let lo = (bytes[i + 1] as char).to_digit(16);
        match (hi, lo) {
            (Some(hi), Some(lo)) => out.push((hi * 16 + lo) as u8),
            _ => break,
        }
        i += 2;
    }
    Bytes::from(out)
}
