//! Persistent channel to the server.
//!
//! A [`ChannelClient`] keeps one duplex connection alive: it pings on a heartbeat,
//! treats a missing pong as a dead link, and reconnects with exponential backoff
//! until its attempt budget runs out. Owners observe it through
//! [`ChannelCallbacks`].
//!
//! The duplex itself is abstracted behind [`Connector`] and [`Duplex`]; the
//! WebSocket implementation lives in [`websocket`].

pub mod client;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use client::ChannelClient;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

use crate::{Error, Result};
use async_trait::async_trait;
use niu_core::PacketMeta;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One message on the duplex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Binary frame, carrying one packet.
    Binary(Vec<u8>),
    /// Text frame.
    Text(String),
}

/// Established bidirectional connection.
#[async_trait]
pub trait Duplex: Send {
    /// Send one message.
    async fn send(&mut self, message: WireMessage) -> Result<()>;

    /// Next message; `None` once the peer has closed. Must be cancel safe.
    async fn recv(&mut self) -> Option<Result<WireMessage>>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Opens duplex connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`, requesting `subprotocols`.
    async fn connect(&self, url: &str, subprotocols: &[String]) -> Result<Box<dyn Duplex>>;
}

/// Why a channel stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadReason {
    /// The owner closed it.
    Closed,
    /// Every reconnect attempt failed.
    RetriesExhausted,
}

type Hook<A> = Box<dyn Fn(A) + Send + Sync>;

/// Channel lifecycle and data callbacks.
///
/// Every callback defaults to a no-op. Callbacks run on the channel's driver task
/// and must not block.
///
/// After a failure the order is `on_will_reconnect` (when a retry is left), then
/// `on_error`, then `on_dead` (when none is). `on_dead` fires exactly once.
///
/// ```
/// use niu_transport::channel::ChannelCallbacks;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let frames = Arc::new(AtomicUsize::new(0));
/// let seen = Arc::clone(&frames);
/// let callbacks = ChannelCallbacks::new()
///     .on_data(move |_meta, _bytes| {
///         seen.fetch_add(1, Ordering::SeqCst);
///     })
///     .on_dead(|reason| println!("channel dead: {:?}", reason));
/// # drop(callbacks);
/// ```
pub struct ChannelCallbacks {
    pub(crate) connected: Hook<()>,
    pub(crate) will_reconnect: Hook<Duration>,
    pub(crate) error: Box<dyn Fn(&Error) + Send + Sync>,
    pub(crate) data: Box<dyn Fn(PacketMeta, Vec<u8>) + Send + Sync>,
    pub(crate) dead: Hook<DeadReason>,
}

impl Default for ChannelCallbacks {
    fn default() -> Self {
        Self {
            connected: Box::new(|_| {}),
            will_reconnect: Box::new(|_| {}),
            error: Box::new(|_| {}),
            data: Box::new(|_, _| {}),
            dead: Box::new(|_| {}),
        }
    }
}

impl ChannelCallbacks {
    /// No-op callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called each time the channel opens.
    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.connected = Box::new(move |_| f());
        self
    }

    /// Called with the backoff delay before each reconnect attempt.
    pub fn on_will_reconnect(mut self, f: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.will_reconnect = Box::new(f);
        self
    }

    /// Called with every connect failure or transport error, after
    /// `on_will_reconnect` for the same failure.
    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.error = Box::new(f);
        self
    }

    /// Called with every inbound packet except pongs: its header and the full frame.
    pub fn on_data(mut self, f: impl Fn(PacketMeta, Vec<u8>) + Send + Sync + 'static) -> Self {
        self.data = Box::new(f);
        self
    }

    /// Called exactly once when the channel stops for good.
    pub fn on_dead(mut self, f: impl Fn(DeadReason) + Send + Sync + 'static) -> Self {
        self.dead = Box::new(f);
        self
    }
}

impl std::fmt::Debug for ChannelCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCallbacks").finish_non_exhaustive()
    }
}
