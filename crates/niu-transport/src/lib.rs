//! Client-side secure transport for niu.
//!
//! Implements:
//! - `request`: signed, encrypted HTTP exchange with retry and single-flight session
//!   refresh
//! - `channel`: a persistent, reconnecting duplex channel with heartbeat liveness
//! - `broker`: one shared channel fanned out to many subscribers
//!
//! Session key material comes from `secrets`; settings from `config`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod channel;
pub mod config;
pub mod error;
pub mod request;
pub mod secrets;

pub use broker::{Broker, BrokerCommand, BrokerEvent, BrokerHandle, SubscriberPort};
pub use channel::{ChannelCallbacks, ChannelClient, Connector, DeadReason, Duplex, WireMessage};
pub use config::{ChannelConfig, ClientConfig, RetryMode};
pub use error::{Error, Result};
pub use request::{HttpTransport, Method, RequestOptions, ResponseBody, SecureClient};
