//! Versioned binary codec for [`Message`].
//!
//! ## Wire layout
//!
//! ```text
//! [version:u32][type:u8][messageId][sourceClientId][destinationTopic][payload]
//!   Request        + [replyToTopic][serviceId]
//!   Response       + [requestMessageId][serviceId]
//!   ErrorResponse  + Response fields + [errorCode:i32][errorMessage]
//! version >= 1     + [count:u32] count x ([key][value])
//! ```
//!
//! Integers are big-endian. Strings are a `u32` length followed by UTF-8,
//! byte arrays a `u32` length followed by the bytes.
//!
//! Decoding ignores bytes left over after the last field a version defines,
//! so newer writers can append fields without breaking older readers. An
//! unknown version is rejected outright.

use bytes::{Buf, BufMut};
use thiserror::Error;

use super::message::{ErrorResponse, Event, Header, Message, MessageType, Request, Response};

/// Errors produced while decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported message version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown message type tag {0}")]
    UnknownMessageType(u8),

    #[error("truncated message: {field} needs {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
}

/// Wire format versions this codec reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WireVersion {
    /// Base fields and variant fields.
    V0 = 0,
    /// Adds `other_fields` after the variant fields.
    V1 = 1,
}

impl WireVersion {
    /// Version written by [`encode`].
    pub const CURRENT: WireVersion = WireVersion::V1;

    /// Every version [`decode`] accepts.
    pub const ALL: [WireVersion; 2] = [WireVersion::V0, WireVersion::V1];

    pub fn number(self) -> u32 {
        self as u32
    }

    pub fn from_number(version: u32) -> Option<Self> {
        match version {
            0 => Some(WireVersion::V0),
            1 => Some(WireVersion::V1),
            _ => None,
        }
    }
}

/// Encode a message at the current wire version.
pub fn encode(message: &Message) -> Vec<u8> {
    encode_with_version(message, WireVersion::CURRENT)
}

/// Encode a message at a specific wire version.
///
/// Fields the version does not define are dropped (version 0 carries no
/// `other_fields`).
pub fn encode_with_version(message: &Message, version: WireVersion) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + message.payload().len());
    buf.put_u32(version.number());
    buf.put_u8(message.message_type().tag());
    put_header(&mut buf, message.header());

    match message {
        Message::Event(_) => {}
        Message::Request(request) => put_request(&mut buf, request),
        Message::Response(response) => put_response(&mut buf, response),
        Message::ErrorResponse(error) => put_error_response(&mut buf, error),
    }

    if version >= WireVersion::V1 {
        put_other_fields(&mut buf, message.header().other_fields());
    }

    buf
}

/// Decode a message from raw transport bytes.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let mut buf = bytes;
    let number = take_u32(&mut buf, "version")?;
    let version = WireVersion::from_number(number).ok_or(DecodeError::UnsupportedVersion(number))?;

    match version {
        WireVersion::V0 => decode_v0(&mut buf),
        WireVersion::V1 => decode_v1(&mut buf),
    }
}

fn decode_v0(buf: &mut &[u8]) -> Result<Message, DecodeError> {
    let tag = take_u8(buf, "type")?;
    let message_type = MessageType::from_tag(tag).ok_or(DecodeError::UnknownMessageType(tag))?;
    let header = take_header(buf)?;

    Ok(match message_type {
        MessageType::Event => Message::Event(Event::from_header(header)),
        MessageType::Request => Message::Request(take_request(buf, header)?),
        MessageType::Response => Message::Response(take_response(buf, header)?),
        MessageType::ErrorResponse => Message::ErrorResponse(take_error_response(buf, header)?),
    })
}

fn decode_v1(buf: &mut &[u8]) -> Result<Message, DecodeError> {
    let mut message = decode_v0(buf)?;
    let other_fields = take_other_fields(buf)?;
    message.header_mut().set_other_fields(other_fields);
    Ok(message)
}

// =============================================================================
// Per-variant fields
// =============================================================================

fn put_header(buf: &mut Vec<u8>, header: &Header) {
    put_str(buf, header.message_id());
    put_str(buf, header.source_client_id());
    put_str(buf, header.destination_topic());
    put_bytes(buf, header.payload());
}

fn take_header(buf: &mut &[u8]) -> Result<Header, DecodeError> {
    let message_id = take_string(buf, "message_id")?;
    let source_client_id = take_string(buf, "source_client_id")?;
    let destination_topic = take_string(buf, "destination_topic")?;
    let payload = take_bytes(buf, "payload")?;
    Ok(Header::from_wire(
        message_id,
        source_client_id,
        destination_topic,
        payload,
    ))
}

fn put_request(buf: &mut Vec<u8>, request: &Request) {
    put_str(buf, request.reply_to_topic());
    put_str(buf, request.service_id());
}

fn take_request(buf: &mut &[u8], header: Header) -> Result<Request, DecodeError> {
    let reply_to_topic = take_string(buf, "reply_to_topic")?;
    let service_id = take_string(buf, "service_id")?;
    Ok(Request::from_parts(header, reply_to_topic, service_id))
}

fn put_response(buf: &mut Vec<u8>, response: &Response) {
    put_str(buf, response.request_message_id());
    put_str(buf, response.service_id());
}

fn take_response(buf: &mut &[u8], header: Header) -> Result<Response, DecodeError> {
    let request_message_id = take_string(buf, "request_message_id")?;
    let service_id = take_string(buf, "service_id")?;
    Ok(Response::from_parts(header, request_message_id, service_id))
}

fn put_error_response(buf: &mut Vec<u8>, error: &ErrorResponse) {
    put_response(buf, error.response());
    buf.put_i32(error.error_code());
    put_str(buf, error.error_message());
}

fn take_error_response(buf: &mut &[u8], header: Header) -> Result<ErrorResponse, DecodeError> {
    let response = take_response(buf, header)?;
    let error_code = take_i32(buf, "error_code")?;
    let error_message = take_string(buf, "error_message")?;
    Ok(ErrorResponse::new(response, error_code, error_message))
}

fn put_other_fields(buf: &mut Vec<u8>, fields: &[(String, String)]) {
    buf.put_u32(fields.len() as u32);
    for (key, value) in fields {
        put_str(buf, key);
        put_str(buf, value);
    }
}

fn take_other_fields(buf: &mut &[u8]) -> Result<Vec<(String, String)>, DecodeError> {
    let count = take_u32(buf, "other_fields")? as usize;
    // Each pair needs at least two length prefixes.
    ensure(buf, count.saturating_mul(8), "other_fields")?;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let key = take_string(buf, "other_fields.key")?;
        let value = take_string(buf, "other_fields.value")?;
        fields.push((key, value));
    }
    Ok(fields)
}

// =============================================================================
// Primitives
// =============================================================================

fn put_str(buf: &mut Vec<u8>, value: &str) {
    put_bytes(buf, value.as_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn ensure(buf: &&[u8], needed: usize, field: &'static str) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated {
            field,
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn take_u8(buf: &mut &[u8], field: &'static str) -> Result<u8, DecodeError> {
    ensure(buf, 1, field)?;
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, DecodeError> {
    ensure(buf, 4, field)?;
    Ok(buf.get_u32())
}

fn take_i32(buf: &mut &[u8], field: &'static str) -> Result<i32, DecodeError> {
    ensure(buf, 4, field)?;
    Ok(buf.get_i32())
}

fn take_bytes(buf: &mut &[u8], field: &'static str) -> Result<Vec<u8>, DecodeError> {
    let len = take_u32(buf, field)? as usize;
    ensure(buf, len, field)?;
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

fn take_string(buf: &mut &[u8], field: &'static str) -> Result<String, DecodeError> {
    let bytes = take_bytes(buf, field)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { field })
}
