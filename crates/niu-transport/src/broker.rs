//! One shared channel, many subscribers.
//!
//! The broker runs as its own task and owns at most one [`ChannelClient`]. Any
//! subscriber may ask it to connect (idempotent while a client is live) or to close
//! (for everyone). Every inbound packet is decoded once and fanned out to all
//! attached ports together with lifecycle events.
//!
//! ```text
//!  port A ──┐  Command / Attach / Detach            ┌──> port A events
//!  port B ──┼──────────────> broker task ───────────┼──> port B events
//!  port C ──┘                    │  ▲               └──> port C events
//!                                ▼  │ Client events
//!                           ChannelClient
//! ```

use crate::channel::{ChannelCallbacks, ChannelClient, Connector, DeadReason};
use crate::config::ChannelConfig;
use crate::{Error, Result};
use niu_core::{Packet, PacketProtocol};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Events buffered per port before new ones are dropped.
pub const DEFAULT_PORT_CAPACITY: usize = 256;

/// Subscriber command.
///
/// JSON form: `{"cmd":"connect","data":{...ChannelConfig...}}` or `{"cmd":"close"}`.
///
/// ```
/// use niu_transport::broker::BrokerCommand;
///
/// let cmd = BrokerCommand::from_json(
///     r#"{"cmd":"connect","data":{"url":"ws://h/chat","subprotocol":["niu-v1"],
///         "heartbeatInterval":10000,"maxRetryAttempts":10}}"#,
/// ).unwrap();
/// assert!(matches!(cmd, BrokerCommand::Connect(_)));
/// assert_eq!(BrokerCommand::from_json(r#"{"cmd":"close"}"#).unwrap(), BrokerCommand::Close);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data", rename_all = "lowercase")]
pub enum BrokerCommand {
    /// Start the shared channel unless one is live.
    Connect(ChannelConfig),
    /// Close the shared channel for every subscriber.
    Close,
}

impl BrokerCommand {
    /// Parse the JSON form.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("broker command: {}", e)))
    }
}

/// Event delivered to every port.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// The shared channel opened.
    Connected,
    /// The shared channel will reconnect after `delay`.
    Reconnecting {
        /// Backoff delay.
        delay: Duration,
    },
    /// The shared channel stopped.
    Dead {
        /// Why it stopped.
        reason: DeadReason,
    },
    /// Inbound packet, decoded once and shared.
    Message(Arc<Packet<Value>>),
}

enum Control {
    Attach {
        id: u64,
        events: mpsc::Sender<BrokerEvent>,
    },
    Detach(u64),
    Command(BrokerCommand),
    Client {
        generation: u64,
        event: BrokerEvent,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Broker constructor.
pub struct Broker;

impl Broker {
    /// Start a broker task using `connector` for its channel.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn(connector: Arc<dyn Connector>) -> BrokerHandle {
        Self::spawn_with_capacity(connector, DEFAULT_PORT_CAPACITY)
    }

    /// Start a broker whose ports buffer at most `port_capacity` events.
    pub fn spawn_with_capacity(connector: Arc<dyn Connector>, port_capacity: usize) -> BrokerHandle {
        let (control, receiver) = mpsc::unbounded_channel();
        let task = BrokerTask {
            connector,
            ports: HashMap::new(),
            client: None,
            generation: 0,
            control: control.downgrade(),
        };
        let task = tokio::spawn(task.run(receiver));

        BrokerHandle {
            control,
            next_port: Arc::new(AtomicU64::new(0)),
            port_capacity: port_capacity.max(1),
            task: Mutex::new(Some(task)),
        }
    }
}

/// Handle to a running broker.
pub struct BrokerHandle {
    control: mpsc::UnboundedSender<Control>,
    next_port: Arc<AtomicU64>,
    port_capacity: usize,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerHandle {
    /// Attach a new subscriber port.
    ///
    /// # Errors
    ///
    /// Returns `Error::BrokerStopped` after shutdown.
    pub fn attach(&self) -> Result<SubscriberPort> {
        let id = self.next_port.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events) = mpsc::channel(self.port_capacity);
        self.control
            .send(Control::Attach {
                id,
                events: events_tx,
            })
            .map_err(|_| Error::BrokerStopped)?;

        Ok(SubscriberPort {
            id,
            control: self.control.clone(),
            events,
        })
    }

    /// Close the shared channel and stop the broker task.
    pub async fn shutdown(self) {
        let (done, finished) = oneshot::channel();
        if self.control.send(Control::Shutdown(done)).is_ok() {
            let _ = finished.await;
        }

        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "broker task panicked");
            }
        }
    }
}

/// One subscriber's connection to the broker.
///
/// Dropping the port detaches it.
pub struct SubscriberPort {
    id: u64,
    control: mpsc::UnboundedSender<Control>,
    events: mpsc::Receiver<BrokerEvent>,
}

impl SubscriberPort {
    /// Port id, unique per broker.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Send a command to the broker.
    ///
    /// # Errors
    ///
    /// Returns `Error::BrokerStopped` after shutdown.
    pub fn send(&self, command: BrokerCommand) -> Result<()> {
        self.control
            .send(Control::Command(command))
            .map_err(|_| Error::BrokerStopped)
    }

    /// Send a command in its JSON form.
    pub fn send_json(&self, text: &str) -> Result<()> {
        self.send(BrokerCommand::from_json(text)?)
    }

    /// Next event; `None` once the broker has stopped.
    pub async fn recv(&mut self) -> Option<BrokerEvent> {
        self.events.recv().await
    }

    /// Next buffered event, without waiting.
    pub fn try_recv(&mut self) -> Option<BrokerEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for SubscriberPort {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Detach(self.id));
    }
}

struct BrokerTask {
    connector: Arc<dyn Connector>,
    ports: HashMap<u64, mpsc::Sender<BrokerEvent>>,
    client: Option<ChannelClient>,
    generation: u64,
    control: mpsc::WeakUnboundedSender<Control>,
}

impl BrokerTask {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Control>) {
        info!("broker started");
        while let Some(message) = receiver.recv().await {
            match message {
                Control::Attach { id, events } => {
                    debug!(port = id, "port attached");
                    self.ports.insert(id, events);
                }
                Control::Detach(id) => {
                    debug!(port = id, "port detached");
                    self.ports.remove(&id);
                }
                Control::Command(command) => self.handle_command(command).await,
                Control::Client { generation, event } => self.handle_client_event(generation, event),
                Control::Shutdown(done) => {
                    self.close_client().await;
                    let _ = done.send(());
                    break;
                }
            }
        }
        self.close_client().await;
        info!("broker stopped");
    }

    async fn handle_command(&mut self, command: BrokerCommand) {
        match command {
            BrokerCommand::Connect(config) => {
                if self.client.is_some() {
                    debug!("channel already live, ignoring connect");
                    return;
                }
                self.generation += 1;
                let callbacks = self.callbacks(self.generation);
                let started = ChannelClient::new(config, Arc::clone(&self.connector), callbacks)
                    .and_then(|client| client.connect().map(|_| client));
                match started {
                    Ok(client) => self.client = Some(client),
                    Err(e) => warn!(error = %e, "channel start failed"),
                }
            }
            BrokerCommand::Close => self.close_client().await,
        }
    }

    fn handle_client_event(&mut self, generation: u64, event: BrokerEvent) {
        if generation != self.generation {
            trace!(generation, "stale channel event");
            return;
        }
        if matches!(event, BrokerEvent::Dead { .. }) {
            self.client = None;
        }
        self.broadcast(event);
    }

    /// Close the live client and tell every port. Events the closed client
    /// still has in flight become stale.
    async fn close_client(&mut self) {
        if let Some(client) = self.client.take() {
            self.generation += 1;
            client.close().await;
            self.broadcast(BrokerEvent::Dead {
                reason: DeadReason::Closed,
            });
        }
    }

    fn broadcast(&mut self, event: BrokerEvent) {
        self.ports.retain(|id, port| match port.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(port = id, "port full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(port = id, "port closed, deregistering");
                false
            }
        });
    }

    fn callbacks(&self, generation: u64) -> ChannelCallbacks {
        let forward = {
            let control = self.control.clone();
            move |event: BrokerEvent| {
                if let Some(control) = control.upgrade() {
                    let _ = control.send(Control::Client { generation, event });
                }
            }
        };
        let forward = Arc::new(forward);
        let protocol = PacketProtocol::default();

        let connected = Arc::clone(&forward);
        let reconnecting = Arc::clone(&forward);
        let dead = Arc::clone(&forward);
        let data = forward;

        ChannelCallbacks::new()
            .on_connected(move || connected(BrokerEvent::Connected))
            .on_will_reconnect(move |delay| reconnecting(BrokerEvent::Reconnecting { delay }))
            .on_dead(move |reason| dead(BrokerEvent::Dead { reason }))
            .on_error(|e| debug!(error = %e, "channel error"))
            .on_data(move |meta, frame| match protocol.decode_value(&frame) {
                Ok(packet) => data(BrokerEvent::Message(Arc::new(packet))),
                Err(e) => warn!(
                    error = %e,
                    msg_type = meta.msg_type.to_u16(),
                    "dropping undecodable packet"
                ),
            })
    }
}
