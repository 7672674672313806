//! Binary packet framing for the persistent channel.
//!
//! Every packet starts with a fixed 16-byte little-endian header followed by the
//! marshaled payload:
//!
//! ```text
//! +----------+------------+-----------+-------------+---------+
//! | msg_type | request_id | timestamp | status_code | payload |
//! |  u16 LE  |   u32 LE   |  u64 LE   |   u16 LE    |   ...   |
//! +----------+------------+-----------+-------------+---------+
//!   0..2       2..6         6..14       14..16        16..
//! ```
//!
//! Requests carry `status_code = 0`. An absent payload is encoded as zero bytes.
//! The payload format is pluggable through [`Marshaler`]; MessagePack is the default.
//!
//! # Example
//!
//! ```
//! use niu_core::packet::{MsgType, PacketProtocol};
//!
//! let protocol = PacketProtocol::default();
//! let bytes = protocol.encode_request(MsgType::App(42), 7, Some(&"hi")).unwrap();
//!
//! let meta = protocol.peek_response_meta(&bytes).unwrap();
//! assert_eq!(meta.msg_type, MsgType::App(42));
//! assert_eq!(meta.request_id, 7);
//!
//! let packet = protocol.decode_response::<String>(&bytes).unwrap();
//! assert_eq!(packet.payload.as_deref(), Some("hi"));
//! ```

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Header length in bytes.
pub const HEADER_LEN: usize = 16;

/// Request ids wrap modulo this value, so `u32::MAX` is never produced.
pub const REQUEST_ID_MODULUS: u32 = 0xFFFF_FFFF;

/// Well-known message types. Any other value is application defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Server signals the session is ready (1).
    Ready,
    /// Client heartbeat (5).
    Ping,
    /// Server heartbeat reply (6).
    Pong,
    /// Application-defined message type.
    App(u16),
}

impl MsgType {
    /// Convert to wire format.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Ready => 1,
            Self::Ping => 5,
            Self::Pong => 6,
            Self::App(value) => value,
        }
    }

    /// Convert from wire format.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::Ready,
            5 => Self::Ping,
            6 => Self::Pong,
            other => Self::App(other),
        }
    }
}

impl From<u16> for MsgType {
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    /// Message type.
    pub msg_type: MsgType,
    /// Request identifier (echoed by responses).
    pub request_id: u32,
    /// Send time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Response status, 0 for requests.
    pub status_code: u16,
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet<T> {
    /// Header fields.
    pub meta: PacketMeta,
    /// Payload, `None` when the packet carried no payload bytes.
    pub payload: Option<T>,
}

/// Pluggable payload format.
pub trait Marshaler: Send + Sync {
    /// Serialize a payload.
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a payload.
    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// MessagePack payloads with named struct fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackMarshaler;

impl Marshaler for MsgPackMarshaler {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| Error::Marshal(e.to_string()))
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Unmarshal(e.to_string()))
    }
}

/// JSON payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaler;

impl Marshaler for JsonMarshaler {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Marshal(e.to_string()))
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Unmarshal(e.to_string()))
    }
}

/// Packet encoder/decoder bound to one payload format.
#[derive(Debug, Clone)]
pub struct PacketProtocol<M = MsgPackMarshaler> {
    marshaler: M,
}

impl Default for PacketProtocol<MsgPackMarshaler> {
    fn default() -> Self {
        Self::new(MsgPackMarshaler)
    }
}

impl<M: Marshaler> PacketProtocol<M> {
    /// Create a protocol using `marshaler` for payloads.
    pub fn new(marshaler: M) -> Self {
        Self { marshaler }
    }

    /// Encode a request packet stamped with the current time and `status_code = 0`.
    pub fn encode_request<T: Serialize + ?Sized>(
        &self,
        msg_type: MsgType,
        request_id: u32,
        payload: Option<&T>,
    ) -> Result<Vec<u8>> {
        let meta = PacketMeta {
            msg_type,
            request_id,
            timestamp: now_millis(),
            status_code: 0,
        };
        self.encode(&meta, payload)
    }

    /// Encode a packet with an explicit header.
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        meta: &PacketMeta,
        payload: Option<&T>,
    ) -> Result<Vec<u8>> {
        let body = match payload {
            Some(value) => self.marshaler.marshal(value)?,
            None => Vec::new(),
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(&meta.msg_type.to_u16().to_le_bytes());
        buf.extend_from_slice(&meta.request_id.to_le_bytes());
        buf.extend_from_slice(&meta.timestamp.to_le_bytes());
        buf.extend_from_slice(&meta.status_code.to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Read only the header, leaving the payload untouched.
    pub fn peek_response_meta(&self, data: &[u8]) -> Result<PacketMeta> {
        peek_meta(data)
    }

    /// Decode header and payload into `T`.
    pub fn decode_response<T: DeserializeOwned>(&self, data: &[u8]) -> Result<Packet<T>> {
        let meta = peek_meta(data)?;
        let body = &data[HEADER_LEN..];

        let payload = if body.is_empty() {
            None
        } else {
            Some(self.marshaler.unmarshal(body)?)
        };

        Ok(Packet { meta, payload })
    }

    /// Decode into a dynamic value, for consumers that dispatch on content.
    pub fn decode_value(&self, data: &[u8]) -> Result<Packet<serde_json::Value>> {
        self.decode_response(data)
    }
}

/// Parse the 16-byte header.
pub fn peek_meta(data: &[u8]) -> Result<PacketMeta> {
    check_len(data, HEADER_LEN)?;

    Ok(PacketMeta {
        msg_type: MsgType::from_u16(read_u16_le(&data[0..2])),
        request_id: read_u32_le(&data[2..6]),
        timestamp: read_u64_le(&data[6..14]),
        status_code: read_u16_le(&data[14..16]),
    })
}

/// Monotonic request id source shared by all senders on one connection.
///
/// The first id is 1; ids wrap modulo [`REQUEST_ID_MODULUS`].
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    current: AtomicU32,
}

impl RequestIdGenerator {
    /// Start at 0 so the first allocated id is 1.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Start from an arbitrary id.
    pub fn starting_at(current: u32) -> Self {
        Self {
            current: AtomicU32::new(current),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> u32 {
        let prev = self
            .current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(Self::successor(id))
            })
            .unwrap_or_else(|id| id);
        Self::successor(prev)
    }

    /// Last allocated id.
    pub fn current(&self) -> u32 {
        self.current.load(Ordering::Relaxed)
    }

    fn successor(id: u32) -> u32 {
        ((u64::from(id) + 1) % u64::from(REQUEST_ID_MODULUS)) as u32
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn check_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        Err(Error::InsufficientData(needed))
    } else {
        Ok(())
    }
}

#[inline]
fn read_u16_le(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

#[inline]
fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

#[inline]
fn read_u64_le(data: &[u8]) -> u64 {
    u64::from_le_bytes([
        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
    ])
}
