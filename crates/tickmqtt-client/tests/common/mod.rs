//! In-memory transport for driving the engine from tests.

#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use parking_lot::Mutex;
use tickmqtt_client::{
    BrokerAddress, Client, Config, ConnAck, ConnectArgs, ConnectReasonCode, Event, Packet,
    ProtocolVersion, Transport, TransportEvent,
};
use tickmqtt_core::frame;

#[derive(Debug)]
pub struct StubState {
    /// Addresses passed to `connect`, in order.
    pub connects: Vec<BrokerAddress>,
    /// `connect` refuses to start for these hosts.
    pub refused_hosts: Vec<String>,
    /// Report `Connected(true)` as soon as a connect starts.
    pub auto_connect: bool,
    pub connected: bool,
    pub inbound: Vec<TransportEvent>,
    pub sent: BytesMut,
    /// Bytes accepted per `send` call.
    pub write_limit: Option<usize>,
    pub closes: usize,
    pub maximum_packet_size: Option<u32>,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            connects: Vec::new(),
            refused_hosts: Vec::new(),
            auto_connect: true,
            connected: false,
            inbound: Vec::new(),
            sent: BytesMut::new(),
            write_limit: None,
            closes: 0,
            maximum_packet_size: None,
        }
    }
}

pub struct StubTransport {
    state: Arc<Mutex<StubState>>,
}

/// Test-side view of a [`StubTransport`].
#[derive(Clone)]
pub struct Broker {
    pub state: Arc<Mutex<StubState>>,
    pub version: ProtocolVersion,
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn stub() -> (Box<dyn Transport>, Broker) {
    init_logging();
    let state = Arc::new(Mutex::new(StubState::default()));
    let transport = StubTransport {
        state: Arc::clone(&state),
    };
    (
        Box::new(transport),
        Broker {
            state,
            version: ProtocolVersion::V5,
        },
    )
}

impl Transport for StubTransport {
    fn connect(&mut self, address: &BrokerAddress) -> bool {
        let mut state = self.state.lock();
        state.connects.push(address.clone());
        if state.refused_hosts.contains(&address.host) {
            return false;
        }
        if state.auto_connect {
            state.connected = true;
            state.inbound.push(TransportEvent::Connected(true));
        }
        true
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        let n = state.write_limit.map_or(bytes.len(), |l| l.min(bytes.len()));
        state.sent.extend_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn close(&mut self) -> bool {
        let mut state = self.state.lock();
        let was_open = state.connected;
        if was_open {
            state.closes += 1;
        }
        state.connected = false;
        was_open
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn poll_events(&mut self, events: &mut Vec<TransportEvent>) {
        events.append(&mut self.state.lock().inbound);
    }

    fn set_maximum_packet_size(&mut self, maximum: Option<u32>) {
        self.state.lock().maximum_packet_size = maximum;
    }
}

impl Broker {
    /// Queue `packet` as if the broker sent it.
    pub fn send(&self, packet: Packet) {
        let frame = packet.encode(self.version).unwrap().freeze();
        self.state.lock().inbound.push(TransportEvent::Data(frame));
    }

    pub fn push_event(&self, event: TransportEvent) {
        self.state.lock().inbound.push(event);
    }

    /// Everything the client wrote since the last call, decoded.
    pub fn received(&self) -> Vec<Packet> {
        let mut state = self.state.lock();
        frame::drain_frames(&mut state.sent, None)
            .unwrap()
            .iter()
            .map(|f| Packet::decode(f, self.version).unwrap())
            .collect()
    }

    pub fn connects(&self) -> Vec<BrokerAddress> {
        self.state.lock().connects.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    /// The socket went away without a DISCONNECT.
    pub fn hang_up(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.inbound.push(TransportEvent::Disconnected);
    }
}

pub fn connack(session_present: bool) -> Packet {
    let mut ack = ConnAck::new(ConnectReasonCode::Success);
    ack.session_present = session_present;
    Packet::ConnAck(ack)
}

pub fn sync_client() -> (Client, Broker) {
    let (transport, broker) = stub();
    (Client::new(Config::default(), transport).unwrap(), broker)
}

/// Connect `client` and complete the handshake, leaving both sides idle.
pub fn establish(client: &Client, broker: &Broker, args: ConnectArgs, now: Instant) {
    client
        .connect(BrokerAddress::new("broker.local", 1883), args)
        .unwrap();
    client.tick_at(now).unwrap();
    let sent = broker.received();
    assert!(matches!(sent.as_slice(), [Packet::Connect(_)]), "{:?}", sent);

    broker.send(connack(false));
    client.tick_at(now).unwrap();
    match client.try_next_event() {
        Some(Event::Connect(details)) => assert!(details.is_successful),
        other => panic!("expected Connect, got {:?}", other),
    }
}

pub fn drain_events(client: &Client) -> Vec<Event> {
    std::iter::from_fn(|| client.try_next_event()).collect()
}
