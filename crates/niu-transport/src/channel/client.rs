//! Reconnecting channel client.
//!
//! ```text
//! Idle --connect()--> Connecting --handshake--> Open
//!                       ^    |                   |
//!                 timer |    | failure           | error, close by peer, pong timeout
//!                       |    v                   v
//!                     Reconnecting <-------------+
//!                       |
//!                       | attempts exhausted
//!                       v
//!                      Dead            close() from any live state: Closing -> Dead
//! ```
//!
//! One driver task per client owns the duplex. The retry counter resets on every
//! successful open. A ping left unanswered for `pong_timeout` fails the session;
//! any pong answers every ping sent before it.

use crate::channel::{ChannelCallbacks, Connector, DeadReason, Duplex, WireMessage};
use crate::config::ChannelConfig;
use crate::{Error, Result};
use niu_core::retry::RetryState;
use niu_core::{ConnectionState, MsgType, PacketProtocol, RequestIdGenerator, StateMachine};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

struct Shared {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    callbacks: ChannelCallbacks,
    state: Mutex<StateMachine>,
    dead_fired: AtomicBool,
    protocol: PacketProtocol,
    ids: RequestIdGenerator,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, StateMachine> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> ConnectionState {
        self.lock_state().state()
    }

    /// Driver-side transition. Refused once the owner has started closing.
    fn advance(&self, to: ConnectionState) -> bool {
        let mut machine = self.lock_state();
        if matches!(machine.state(), ConnectionState::Closing | ConnectionState::Dead) {
            return false;
        }
        match machine.transition(to) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "channel transition refused");
                false
            }
        }
    }

    fn fire_dead(&self, reason: DeadReason) {
        if !self.dead_fired.swap(true, Ordering::SeqCst) {
            info!(url = %self.config.url, ?reason, "channel dead");
            (self.callbacks.dead)(reason);
        }
    }

    fn encode<T: Serialize + ?Sized>(&self, msg_type: MsgType, payload: Option<&T>) -> (u32, Result<Vec<u8>>) {
        let request_id = self.ids.next_id();
        let frame = self
            .protocol
            .encode_request(msg_type, request_id, payload)
            .map_err(Error::from);
        (request_id, frame)
    }

    fn handle_frame(&self, frame: Vec<u8>, awaiting_pong: &mut Option<Instant>) {
        let meta = match self.protocol.peek_response_meta(&frame) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "dropping malformed frame");
                return;
            }
        };
        trace!(msg_type = meta.msg_type.to_u16(), request_id = meta.request_id, "frame received");

        if meta.msg_type == MsgType::Pong {
            *awaiting_pong = None;
        } else {
            (self.callbacks.data)(meta, frame);
        }
    }
}

/// Persistent, reconnecting channel.
///
/// # Example
///
/// ```no_run
/// use niu_core::MsgType;
/// use niu_transport::channel::{ChannelCallbacks, ChannelClient, WebSocketConnector};
/// use niu_transport::config::ChannelConfig;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> niu_transport::Result<()> {
/// let config = ChannelConfig::new("wss://localhost:8001/hub/chat").with_subprotocol("niu-v1");
/// let callbacks = ChannelCallbacks::new()
///     .on_data(|meta, _frame| println!("got {:?}", meta.msg_type));
/// let client = ChannelClient::new(config, Arc::new(WebSocketConnector::new()), callbacks)?;
///
/// client.connect()?;
/// client.send_msg(MsgType::App(100), Some(&"hello"));
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ChannelClient {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ChannelClient {
    /// Build an idle client.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when `config` does not validate.
    pub fn new(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        callbacks: ChannelCallbacks,
    ) -> Result<Self> {
        config.validate()?;
        let (outbound, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector,
                callbacks,
                state: Mutex::new(StateMachine::new()),
                dead_fired: AtomicBool::new(false),
                protocol: PacketProtocol::default(),
                ids: RequestIdGenerator::new(),
            }),
            outbound,
            receiver: Mutex::new(Some(receiver)),
            driver: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Configuration in use.
    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Start connecting. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` with an invalid transition unless the client is idle.
    pub fn connect(&self) -> Result<()> {
        {
            let mut machine = self.shared.lock_state();
            if machine.state() != ConnectionState::Idle {
                return Err(niu_core::Error::InvalidTransition {
                    from: machine.state(),
                    to: ConnectionState::Connecting,
                }
                .into());
            }
            machine.transition(ConnectionState::Connecting)?;
        }

        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| Error::ConnectionFailed("client already started".into()))?;

        info!(url = %self.shared.config.url, "channel connecting");
        let handle = tokio::spawn(drive(
            Arc::clone(&self.shared),
            receiver,
            self.cancel.clone(),
        ));
        *self.driver.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        Ok(())
    }

    /// Send a packet, returning its request id.
    ///
    /// The request id is allocated either way; the frame is dropped and `None`
    /// returned when the channel is not open.
    pub fn send_msg<T: Serialize + ?Sized>(&self, msg_type: MsgType, payload: Option<&T>) -> Option<u32> {
        let (request_id, frame) = self.shared.encode(msg_type, payload);

        let state = self.state();
        if state != ConnectionState::Open {
            warn!(?state, msg_type = msg_type.to_u16(), request_id, "channel not open, dropping message");
            return None;
        }

        match frame {
            Ok(frame) => self.outbound.send(frame).ok().map(|_| request_id),
            Err(e) => {
                warn!(error = %e, request_id, "failed to encode message");
                None
            }
        }
    }

    /// Close the channel and wait for the driver to stop.
    ///
    /// Fires `on_dead(Closed)` unless the channel was already dead. No connect
    /// attempt starts after this returns.
    pub async fn close(&self) {
        {
            let mut machine = self.shared.lock_state();
            if machine.state().is_dead() || machine.state() == ConnectionState::Closing {
                return;
            }
            if let Err(e) = machine.transition(ConnectionState::Closing) {
                warn!(error = %e, "channel close refused");
                return;
            }
        }
        self.cancel.cancel();

        let driver = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                warn!(error = %e, "channel driver panicked");
            }
        }

        if let Err(e) = self.shared.lock_state().transition(ConnectionState::Dead) {
            warn!(error = %e, "channel close transition refused");
        }
        self.shared.fire_dead(DeadReason::Closed);
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drive(
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut retry = RetryState::new(shared.config.backoff());

    loop {
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = shared.connector.connect(&shared.config.url, &shared.config.subprotocol) => result,
        };

        let failure = match connected {
            Ok(mut duplex) => {
                if !shared.advance(ConnectionState::Open) {
                    let _ = duplex.close().await;
                    return;
                }
                retry.reset();
                while outbound.try_recv().is_ok() {}
                info!(url = %shared.config.url, "channel open");
                (shared.callbacks.connected)(());

                match run_session(&shared, duplex.as_mut(), &mut outbound, &cancel).await {
                    Some(failure) => failure,
                    None => {
                        if let Err(e) = duplex.close().await {
                            debug!(error = %e, "close handshake failed");
                        }
                        return;
                    }
                }
            }
            Err(e) => e,
        };

        if cancel.is_cancelled() {
            return;
        }
        warn!(url = %shared.config.url, error = %failure, "channel failure");

        if !shared.advance(ConnectionState::Reconnecting) {
            (shared.callbacks.error)(&failure);
            return;
        }

        let next = retry.next();
        if let Some(delay) = next {
            info!(?delay, attempt = retry.attempt(), "channel reconnecting");
            (shared.callbacks.will_reconnect)(delay);
        }
        (shared.callbacks.error)(&failure);

        match next {
            Some(delay) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = sleep(delay) => {}
                }
                if !shared.advance(ConnectionState::Connecting) {
                    return;
                }
            }
            None => {
                if shared.advance(ConnectionState::Dead) {
                    shared.fire_dead(DeadReason::RetriesExhausted);
                }
                return;
            }
        }
    }
}

/// Pump one open connection. Returns the failure that ended it, or `None` when
/// cancelled.
async fn run_session(
    shared: &Shared,
    duplex: &mut dyn Duplex,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: &CancellationToken,
) -> Option<Error> {
    let heartbeat = shared.config.heartbeat();
    let pong_timeout = shared.config.pong_timeout();
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Oldest ping still waiting for a pong.
    let mut awaiting_pong: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = ticker.tick() => {
                if awaiting_pong.is_some_and(|sent| sent.elapsed() >= pong_timeout) {
                    return Some(Error::HeartbeatTimeout);
                }
                let (_, ping) = shared.encode::<()>(MsgType::Ping, None);
                let sent = match ping {
                    Ok(ping) => duplex.send(WireMessage::Binary(ping)).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    return Some(e);
                }
                awaiting_pong.get_or_insert_with(Instant::now);
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = duplex.send(WireMessage::Binary(frame)).await {
                    return Some(e);
                }
            }
            inbound = duplex.recv() => match inbound {
                None => return Some(Error::ConnectionClosed),
                Some(Err(e)) => return Some(e),
                Some(Ok(WireMessage::Binary(frame))) => shared.handle_frame(frame, &mut awaiting_pong),
                Some(Ok(WireMessage::Text(text))) => {
                    debug!(len = text.len(), "ignoring text frame");
                }
            },
        }
    }
}
