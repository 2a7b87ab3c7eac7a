use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{BindBody, BindRespBody, Body, Command, MessageBody, MessageRespBody, Pdu};

/// Largest frame we will read or write. SMPP allows 4GiB on the wire but no
/// sane peer sends more than this; anything larger is treated as a framing
/// error and kills the connection.
pub const MAX_PDU_SIZE: usize = 65536;

/// Size of the fixed PDU header: command_length, command_id, command_status
/// and sequence_number, each a big-endian u32.
const HEADER_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("pdu length {0} out of bounds")]
    InvalidLength(usize),
    #[error("truncated pdu body for command {0:#010x}")]
    TruncatedBody(u32),
    #[error("unterminated c-octet string in command {0:#010x}")]
    UnterminatedString(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Length-prefixed SMPP framing for use with `tokio_util::codec::Framed`.
#[derive(Debug, Default)]
pub struct SmppCodec;

impl Decoder for SmppCodec {
    type Item = Pdu;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Pdu>, CodecError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if !(HEADER_SIZE..=MAX_PDU_SIZE).contains(&length) {
            return Err(CodecError::InvalidLength(length));
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        frame.advance(4);
        let command = frame.get_u32();
        let status = frame.get_u32();
        let sequence = frame.get_u32();
        let body = decode_body(command, frame.freeze())?;
        Ok(Some(Pdu {
            command,
            status,
            sequence,
            body,
        }))
    }
}

impl Encoder<Pdu> for SmppCodec {
    type Error = CodecError;

    fn encode(&mut self, pdu: Pdu, dst: &mut BytesMut) -> Result<(), CodecError> {
        let start = dst.len();
        dst.put_u32(0); // patched below once the body size is known
        dst.put_u32(pdu.command);
        dst.put_u32(pdu.status);
        dst.put_u32(pdu.sequence);
        encode_body(&pdu.body, dst)?;

        let length = dst.len() - start;
        if length > MAX_PDU_SIZE {
            return Err(CodecError::InvalidLength(length));
        }
        dst[start..start + 4].copy_from_slice(&(length as u32).to_be_bytes());
        Ok(())
    }
}

fn decode_body(command: u32, mut body: Bytes) -> Result<Body, CodecError> {
    let Ok(known) = Command::try_from(command) else {
        return Ok(opaque(body));
    };
    match known {
        Command::BindTransmitter | Command::BindReceiver | Command::BindTransceiver => {
            let system_id = get_cstring(&mut body, 16, command)?;
            let password = get_cstring(&mut body, 9, command)?;
            let system_type = get_cstring(&mut body, 13, command)?;
            if body.remaining() < 3 {
                return Err(CodecError::TruncatedBody(command));
            }
            let interface_version = body.get_u8();
            let addr_ton = body.get_u8();
            let addr_npi = body.get_u8();
            let address_range = get_cstring(&mut body, 41, command)?;
            Ok(Body::Bind(BindBody {
                system_id,
                password,
                system_type,
                interface_version,
                addr_ton,
                addr_npi,
                address_range,
            }))
        }
        Command::BindTransmitterResp | Command::BindReceiverResp | Command::BindTransceiverResp => {
            // A failed bind response legally has no body at all.
            if body.is_empty() {
                return Ok(Body::BindResp(BindRespBody::default()));
            }
            let system_id = get_cstring(&mut body, 16, command)?;
            Ok(Body::BindResp(BindRespBody { system_id }))
        }
        Command::SubmitSm | Command::DeliverSm => {
            let service_type = get_cstring(&mut body, 6, command)?;
            if body.remaining() < 2 {
                return Err(CodecError::TruncatedBody(command));
            }
            let source_addr_ton = body.get_u8();
            let source_addr_npi = body.get_u8();
            let source_addr = get_cstring(&mut body, 21, command)?;
            if body.remaining() < 2 {
                return Err(CodecError::TruncatedBody(command));
            }
            let dest_addr_ton = body.get_u8();
            let dest_addr_npi = body.get_u8();
            let destination_addr = get_cstring(&mut body, 21, command)?;
            if body.remaining() < 3 {
                return Err(CodecError::TruncatedBody(command));
            }
            let esm_class = body.get_u8();
            let protocol_id = body.get_u8();
            let priority_flag = body.get_u8();
            let schedule_delivery_time = get_cstring(&mut body, 17, command)?;
            let validity_period = get_cstring(&mut body, 17, command)?;
            if body.remaining() < 5 {
                return Err(CodecError::TruncatedBody(command));
            }
            let registered_delivery = body.get_u8();
            let replace_if_present_flag = body.get_u8();
            let data_coding = body.get_u8();
            let sm_default_msg_id = body.get_u8();
            let sm_length = body.get_u8() as usize;
            if body.remaining() < sm_length {
                return Err(CodecError::TruncatedBody(command));
            }
            let short_message = body.split_to(sm_length);
            Ok(Body::Message(MessageBody {
                service_type,
                source_addr_ton,
                source_addr_npi,
                source_addr,
                dest_addr_ton,
                dest_addr_npi,
                destination_addr,
                esm_class,
                protocol_id,
                priority_flag,
                schedule_delivery_time,
                validity_period,
                registered_delivery,
                replace_if_present_flag,
                data_coding,
                sm_default_msg_id,
                short_message,
                tlvs: body,
            }))
        }
        Command::SubmitSmResp | Command::DeliverSmResp => {
            // A nacked submit_sm_resp may omit the message_id entirely.
            if body.is_empty() {
                return Ok(Body::MessageResp(MessageRespBody::default()));
            }
            let message_id = get_cstring(&mut body, 65, command)?;
            Ok(Body::MessageResp(MessageRespBody { message_id }))
        }
        Command::Unbind
        | Command::UnbindResp
        | Command::EnquireLink
        | Command::EnquireLinkResp
        | Command::GenericNack => Ok(Body::Empty),
        _ => Ok(opaque(body)),
    }
}

fn encode_body(body: &Body, dst: &mut BytesMut) -> Result<(), CodecError> {
    match body {
        Body::Bind(bind) => {
            put_cstring(dst, &bind.system_id, 16);
            put_cstring(dst, &bind.password, 9);
            put_cstring(dst, &bind.system_type, 13);
            dst.put_u8(bind.interface_version);
            dst.put_u8(bind.addr_ton);
            dst.put_u8(bind.addr_npi);
            put_cstring(dst, &bind.address_range, 41);
        }
        Body::BindResp(resp) => {
            put_cstring(dst, &resp.system_id, 16);
        }
        Body::Message(msg) => {
            put_cstring(dst, &msg.service_type, 6);
            dst.put_u8(msg.source_addr_ton);
            dst.put_u8(msg.source_addr_npi);
            put_cstring(dst, &msg.source_addr, 21);
            dst.put_u8(msg.dest_addr_ton);
            dst.put_u8(msg.dest_addr_npi);
            put_cstring(dst, &msg.destination_addr, 21);
            dst.put_u8(msg.esm_class);
            dst.put_u8(msg.protocol_id);
            dst.put_u8(msg.priority_flag);
            put_cstring(dst, &msg.schedule_delivery_time, 17);
            put_cstring(dst, &msg.validity_period, 17);
            dst.put_u8(msg.registered_delivery);
            dst.put_u8(msg.replace_if_present_flag);
            dst.put_u8(msg.data_coding);
            dst.put_u8(msg.sm_default_msg_id);
            let sm = &msg.short_message[..msg.short_message.len().min(254)];
            dst.put_u8(sm.len() as u8);
            dst.put_slice(sm);
            dst.put_slice(&msg.tlvs);
        }
        Body::MessageResp(resp) => {
            put_cstring(dst, &resp.message_id, 65);
        }
        Body::Empty => {}
        Body::Opaque(raw) => dst.put_slice(raw),
    }
    Ok(())
}

fn opaque(body: Bytes) -> Body {
    if body.is_empty() {
        Body::Empty
    } else {
        Body::Opaque(body)
    }
}

/// Read a NUL-terminated string of at most `max` bytes including the
/// terminator.
fn get_cstring(src: &mut Bytes, max: usize, command: u32) -> Result<String, CodecError> {
    let limit = src.len().min(max);
    let Some(end) = src[..limit].iter().position(|b| *b == 0) else {
        return Err(CodecError::UnterminatedString(command));
    };
    let text = String::from_utf8_lossy(&src[..end]).into_owned();
    src.advance(end + 1);
    Ok(text)
}

/// Write a NUL-terminated string, truncating to `max` bytes including the
/// terminator.
fn put_cstring(dst: &mut BytesMut, value: &str, max: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(max - 1);
    dst.put_slice(&bytes[..len]);
    dst.put_u8(0);
}
