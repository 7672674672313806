//! Persistent channel integration tests.
//!
//! Tests the channel lifecycle end to end:
//! - Reconnect with exponential backoff and a bounded attempt budget
//! - Retry counter reset after a successful open
//! - Heartbeat pings and pong liveness
//! - Inbound dispatch and outbound sends
//! - Close during backoff and while open
//! - A real WebSocket server with subprotocol negotiation


use niu_core::{ConnectionState, MsgType, PacketMeta, PacketProtocol};
use niu_transport::channel::{ChannelCallbacks, ChannelClient, DeadReason, WebSocketConnector, WireMessage};
use niu_transport::config::ChannelConfig;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::{pong_for, server_packet, spawn_ws_server, Script, ScriptedConnector, SUBPROTOCOL, TEST_TIMEOUT};
use tokio::time::{sleep, Instant};

#[derive(Default)]
struct Recorder {
    connected: AtomicUsize,
    delays: Mutex<Vec<Duration>>,
    errors: Mutex<Vec<String>>,
    dead: Mutex<Vec<DeadReason>>,
    data: Mutex<Vec<(PacketMeta, Vec<u8>)>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn callbacks(self: &Arc<Self>) -> ChannelCallbacks {
        let connected = Arc::clone(self);
        let delays = Arc::clone(self);
        let errors = Arc::clone(self);
        let dead = Arc::clone(self);
        let data = Arc::clone(self);
        ChannelCallbacks::new()
            .on_connected(move || {
                connected.connected.fetch_add(1, Ordering::SeqCst);
            })
            .on_will_reconnect(move |delay| delays.delays.lock().unwrap().push(delay))
            .on_error(move |e| errors.errors.lock().unwrap().push(e.to_string()))
            .on_dead(move |reason| dead.dead.lock().unwrap().push(reason))
            .on_data(move |meta, frame| data.data.lock().unwrap().push((meta, frame)))
    }

    fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    fn dead(&self) -> Vec<DeadReason> {
        self.dead.lock().unwrap().clone()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(5)).await;
    }
}

fn config(max_attempts: u32) -> ChannelConfig {
    ChannelConfig::new("ws://mock/hub/chat")
        .with_subprotocol(SUBPROTOCOL)
        .with_max_retry_attempts(max_attempts)
}

fn secs(list: &[u64]) -> Vec<Duration> {
    list.iter().map(|s| Duration::from_secs(*s)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_budget_exhausted() {
    let connector = ScriptedConnector::new([Script::Accept { auto_pong: true }]);
    let recorder = Recorder::new();
    let client = ChannelClient::new(config(3), connector.clone(), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| recorder.connected() == 1).await;
    assert_eq!(client.state(), ConnectionState::Open);

    drop(connector.take_peer());
    wait_until(|| client.state() == ConnectionState::Dead).await;

    assert_eq!(connector.attempts(), 4, "initial connect plus three reconnects");
    assert_eq!(recorder.delays(), secs(&[1, 2, 4]));
    assert_eq!(recorder.dead(), vec![DeadReason::RetriesExhausted]);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 4, "no attempt after dead");

    client.close().await;
    assert_eq!(recorder.dead().len(), 1, "on_dead fires exactly once");
}

#[tokio::test(start_paused = true)]
async fn test_retry_counter_resets_after_open() {
    let connector = ScriptedConnector::new([
        Script::Accept { auto_pong: true },
        Script::Refuse,
        Script::Accept { auto_pong: true },
    ]);
    let recorder = Recorder::new();
    let client = ChannelClient::new(config(2), connector.clone(), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| recorder.connected() == 1).await;
    drop(connector.take_peer());

    wait_until(|| recorder.connected() == 2).await;
    assert_eq!(recorder.delays(), secs(&[1, 2]));
    drop(connector.take_peer());

    wait_until(|| client.state() == ConnectionState::Dead).await;
    assert_eq!(recorder.delays(), secs(&[1, 2, 1, 2]));
    assert_eq!(connector.attempts(), 5);
    assert_eq!(recorder.dead(), vec![DeadReason::RetriesExhausted]);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_pings_with_pongs_stay_open() {
    let connector = ScriptedConnector::new([Script::Accept { auto_pong: true }]);
    let recorder = Recorder::new();
    let config = config(3).with_heartbeat(Duration::from_secs(1));
    let client = ChannelClient::new(config, connector.clone(), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| recorder.connected() == 1).await;
    let peer = connector.take_peer().unwrap();

    sleep(Duration::from_millis(5500)).await;

    assert_eq!(client.state(), ConnectionState::Open);
    let pings = peer.sent_of(MsgType::Ping);
    assert_eq!(pings.len(), 5);

    let ids: Vec<u32> = pings
        .iter()
        .map(|p| niu_core::packet::peek_meta(p).unwrap().request_id)
        .collect();
    assert!(ids.windows(2).all(|w| w[1] == w[0] + 1), "{:?}", ids);
    assert!(recorder.data.lock().unwrap().is_empty(), "pongs are not forwarded");

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_pong_triggers_reconnect() {
    let connector = ScriptedConnector::new([Script::Accept { auto_pong: false }]);
    let recorder = Recorder::new();
    let config = config(0).with_heartbeat(Duration::from_secs(1));
    let client = ChannelClient::new(config, connector.clone(), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| recorder.connected() == 1).await;
    let opened = Instant::now();
    let _peer = connector.take_peer().unwrap();

    wait_until(|| client.state() == ConnectionState::Dead).await;

    // First unanswered ping goes out at 1s; it has been pending 2s by the 3s tick.
    assert!(opened.elapsed() >= Duration::from_secs(2));
    assert!(opened.elapsed() < Duration::from_secs(4));
    assert_eq!(*recorder.errors.lock().unwrap(), vec!["Heartbeat timeout".to_string()]);
    assert_eq!(recorder.dead(), vec![DeadReason::RetriesExhausted]);
}

#[tokio::test(start_paused = true)]
async fn test_pong_timeout_equal_to_heartbeat_stays_open() {
    let connector = ScriptedConnector::new([Script::Accept { auto_pong: true }]);
    let recorder = Recorder::new();
    let config = config(3)
        .with_heartbeat(Duration::from_secs(1))
        .with_pong_timeout(Duration::from_secs(1));
    config.validate().unwrap();
    let client = ChannelClient::new(config, connector.clone(), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| recorder.connected() == 1).await;
    let peer = connector.take_peer().unwrap();

    sleep(Duration::from_millis(3500)).await;

    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(peer.sent_of(MsgType::Ping).len(), 3);
    assert!(recorder.errors.lock().unwrap().is_empty());
    assert!(recorder.delays().is_empty());

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_pong_within_window_keeps_channel() {
    let connector = ScriptedConnector::new([Script::Accept { auto_pong: false }]);
    let recorder = Recorder::new();
    let config = config(0)
        .with_heartbeat(Duration::from_secs(1))
        .with_pong_timeout(Duration::from_secs(3));
    let client = ChannelClient::new(config, connector.clone(), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| recorder.connected() == 1).await;
    let peer = connector.take_peer().unwrap();

    for _ in 0..4 {
        sleep(Duration::from_millis(1500)).await;
        let ping = niu_core::packet::peek_meta(peer.sent_of(MsgType::Ping).last().unwrap()).unwrap();
        peer.to_client
            .send(WireMessage::Binary(pong_for(&ping)))
            .unwrap();
    }

    assert_eq!(client.state(), ConnectionState::Open);
    client.close().await;
}

#[tokio::test]
async fn test_inbound_data_dispatched() {
    let connector = ScriptedConnector::new([Script::Accept { auto_pong: false }]);
    let recorder = Recorder::new();
    let client = ChannelClient::new(config(3), connector.clone(), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| recorder.connected() == 1).await;
    let peer = connector.take_peer().unwrap();

    let payload = json!({"room": 1, "text": "hi"});
    peer.to_client
        .send(WireMessage::Text("ignored".into()))
        .unwrap();
    peer.to_client
        .send(WireMessage::Binary(vec![1, 2, 3]))
        .unwrap();
    peer.to_client
        .send(WireMessage::Binary(server_packet(100, 42, &payload)))
        .unwrap();

    wait_until(|| recorder.data.lock().unwrap().len() == 1).await;

    let (meta, frame) = recorder.data.lock().unwrap()[0].clone();
    assert_eq!(meta.msg_type, MsgType::App(100));
    assert_eq!(meta.request_id, 42);
    assert_eq!(meta.status_code, 200);
    let packet = PacketProtocol::default().decode_response::<Value>(&frame).unwrap();
    assert_eq!(packet.payload, Some(payload));
    assert_eq!(client.state(), ConnectionState::Open, "malformed frames are dropped");

    client.close().await;
}

#[tokio::test]
async fn test_send_msg_reaches_peer_when_open() {
    let connector = ScriptedConnector::new([Script::Accept { auto_pong: true }]);
    let recorder = Recorder::new();
    let client = ChannelClient::new(config(3), connector.clone(), recorder.callbacks()).unwrap();

    assert_eq!(client.send_msg(MsgType::App(100), Some(&json!({"early": true}))), None);

    client.connect().unwrap();
    wait_until(|| recorder.connected() == 1).await;
    let peer = connector.take_peer().unwrap();

    let id = client
        .send_msg(MsgType::App(100), Some(&json!({"text": "hello"})))
        .expect("channel is open");
    assert_eq!(id, 2, "the dropped message still consumed an id");

    wait_until(|| peer.sent_of(MsgType::App(100)).len() == 1).await;
    let frame = &peer.sent_of(MsgType::App(100))[0];
    let packet = PacketProtocol::default().decode_response::<Value>(frame).unwrap();
    assert_eq!(packet.meta.request_id, 2);
    assert_eq!(packet.meta.status_code, 0);
    assert_eq!(packet.payload, Some(json!({"text": "hello"})));
    assert_eq!(connector.requested_protocols(), vec![vec![SUBPROTOCOL.to_string()]]);

    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_during_backoff() {
    let connector = ScriptedConnector::new([Script::Refuse]);
    let recorder = Recorder::new();
    let client = ChannelClient::new(config(10), connector.clone(), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| recorder.delays().len() == 1).await;
    assert_eq!(client.state(), ConnectionState::Reconnecting);

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Dead);
    assert_eq!(recorder.dead(), vec![DeadReason::Closed]);

    sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.attempts(), 1, "no connect attempt after close");
}

#[tokio::test]
async fn test_close_while_open() {
    let connector = ScriptedConnector::new([Script::Accept { auto_pong: true }]);
    let recorder = Recorder::new();
    let client = ChannelClient::new(config(3), connector.clone(), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| recorder.connected() == 1).await;

    client.close().await;
    client.close().await;

    assert_eq!(client.state(), ConnectionState::Dead);
    assert_eq!(recorder.dead(), vec![DeadReason::Closed]);
    assert!(recorder.errors.lock().unwrap().is_empty());
    assert_eq!(client.send_msg::<()>(MsgType::Ping, None), None);
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let addr = spawn_ws_server().await;
    let recorder = Recorder::new();
    let config = ChannelConfig::new(format!("ws://{}/hub/chat", addr))
        .with_subprotocol(SUBPROTOCOL)
        .with_heartbeat(Duration::from_millis(100));
    let client = ChannelClient::new(config, Arc::new(WebSocketConnector::new()), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| recorder.connected() == 1).await;

    let id = client
        .send_msg(MsgType::App(300), Some(&json!({"n": 1})))
        .unwrap();
    wait_until(|| !recorder.data.lock().unwrap().is_empty()).await;

    let (meta, frame) = recorder.data.lock().unwrap()[0].clone();
    assert_eq!(meta.msg_type, MsgType::App(300));
    assert_eq!(meta.request_id, id);
    assert_eq!(meta.status_code, 200);
    let packet = PacketProtocol::default().decode_value(&frame).unwrap();
    assert_eq!(packet.payload, Some(json!({"n": 1})));

    // Pongs from the server keep the channel alive across several heartbeats.
    sleep(Duration::from_millis(450)).await;
    assert_eq!(client.state(), ConnectionState::Open);
    assert!(recorder.errors.lock().unwrap().is_empty());

    client.close().await;
    assert_eq!(recorder.dead(), vec![DeadReason::Closed]);
}

#[tokio::test]
async fn test_websocket_requires_subprotocol() {
    let addr = spawn_ws_server().await;
    let recorder = Recorder::new();
    let config = ChannelConfig::new(format!("ws://{}/hub/chat", addr)).with_max_retry_attempts(0);
    let client = ChannelClient::new(config, Arc::new(WebSocketConnector::new()), recorder.callbacks()).unwrap();

    client.connect().unwrap();
    wait_until(|| client.state() == ConnectionState::Dead).await;

    assert_eq!(recorder.connected(), 0);
    assert!(recorder.errors.lock().unwrap()[0].starts_with("Connection failed"));
    assert_eq!(recorder.dead(), vec![DeadReason::RetriesExhausted]);
}

#[tokio::test(start_paused = true)]
async fn test_failure_callback_order() {
    let connector = ScriptedConnector::new([Script::Refuse, Script::Refuse]);
    let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let push = |entry: &'static str| {
        let log = Arc::clone(&log);
        move || log.lock().unwrap().push(entry)
    };
    let (reconnect, error, dead) = (push("will_reconnect"), push("error"), push("dead"));
    let callbacks = ChannelCallbacks::new()
        .on_will_reconnect(move |_| reconnect())
        .on_error(move |_| error())
        .on_dead(move |_| dead());
    let client = ChannelClient::new(config(1), connector.clone(), callbacks).unwrap();

    client.connect().unwrap();
    wait_until(|| client.state() == ConnectionState::Dead).await;

    assert_eq!(*log.lock().unwrap(), vec!["will_reconnect", "error", "error", "dead"]);
    assert_eq!(connector.attempts(), 2);
}
