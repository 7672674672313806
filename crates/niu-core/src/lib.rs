//! Protocol core for the niu secure transport.
//!
//! This crate holds the I/O-free building blocks shared by the request client and
//! the persistent channel:
//! - Binary packet framing with a pluggable payload marshaler
//! - Canonical sign payloads for request and response signatures
//! - Exponential backoff policy
//! - Connection lifecycle state machine
//!
//! Networking, storage and timers live in `niu-transport`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod canonical;
pub mod error;
pub mod packet;
pub mod retry;
pub mod state;

pub use canonical::{encode_query, Query, RequestSignPayload, ResponseSignPayload};
pub use error::{Error, Result};
pub use packet::{
    JsonMarshaler, Marshaler, MsgPackMarshaler, MsgType, Packet, PacketMeta, PacketProtocol,
    RequestIdGenerator,
};
pub use retry::{ExponentialBackoff, RetryState};
pub use state::{ConnectionState, StateMachine};
