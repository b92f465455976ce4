//! MQTT client facade.
//!
//! Wraps the connection state machine in a mutex so operations can be issued
//! from any thread. In [`TickMode::Sync`] the caller drives the engine with
//! [`Client::tick`]; in [`TickMode::Async`] a background thread ticks on a
//! timed condition variable that every operation signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tickmqtt_core::{Auth, QoS, SubscriptionOptions};

use crate::config::{Config, TickMode};
use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::events::{ConnectionState, Event};
use crate::options::{BrokerAddress, ConnectArgs, DisconnectArgs, PublishOptions, SubscribeProperties};
use crate::store::SessionStore;
use crate::transport::{TcpTransport, Transport};

struct Shared {
    connection: Mutex<Connection>,
    wake: Condvar,
    stop: AtomicBool,
    events: Sender<Event>,
}

impl Shared {
    /// Run `f` on the connection, then publish its events and wake the tick
    /// thread.
    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> T) -> T {
        let mut connection = self.connection.lock();
        let result = f(&mut connection);
        self.forward_events(&mut connection);
        drop(connection);
        self.wake.notify_one();
        result
    }

    fn forward_events(&self, connection: &mut Connection) {
        for event in connection.take_events() {
            // The receiver lives as long as the client
            let _ = self.events.send(event);
        }
    }
}

/// MQTT client.
pub struct Client {
    shared: Arc<Shared>,
    events: Receiver<Event>,
    mode: TickMode,
    worker: Option<JoinHandle<()>>,
    shut_down: bool,
}

impl Client {
    /// Create a client over `transport`. In async mode the tick thread is
    /// started here.
    pub fn new(config: Config, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let mode = config.tick_mode;
        let interval = config.async_tick_interval();

        let shared = Arc::new(Shared {
            connection: Mutex::new(Connection::new(config, transport)),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
            events: tx,
        });

        let worker = match mode {
            TickMode::Sync => None,
            TickMode::Async => {
                let shared = Arc::clone(&shared);
                Some(
                    thread::Builder::new()
                        .name("tickmqtt-tick".into())
                        .spawn(move || tick_loop(&shared, interval))?,
                )
            }
        };

        Ok(Self {
            shared,
            events: rx,
            mode,
            worker,
            shut_down: false,
        })
    }

    /// Create a client over a plain TCP transport.
    pub fn tcp(config: Config) -> Result<Self> {
        let transport = TcpTransport::with_buffer_size(config.receive_buffer_size)?;
        Self::new(config, Box::new(transport))
    }

    /// Persist session state through `store`. Takes effect on the next
    /// `connect`.
    pub fn set_session_store(&self, store: Box<dyn SessionStore>) {
        self.shared
            .with_connection(|c| c.set_session_store(store));
    }

    /// Start connecting. The outcome arrives as [`Event::Connect`].
    pub fn connect(&self, address: BrokerAddress, args: ConnectArgs) -> Result<()> {
        self.shared
            .with_connection(|c| c.connect(address, args, Instant::now()))
    }

    /// Queue a publish. Returns the packet identifier for QoS 1/2.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        options: &PublishOptions,
    ) -> Result<Option<u16>> {
        let payload = payload.into();
        self.shared
            .with_connection(|c| c.publish(topic, payload, options, Instant::now()))
    }

    /// Subscribe to topics with default options.
    pub fn subscribe(&self, topics: &[(&str, QoS)]) -> Result<u16> {
        let subscriptions: Vec<_> = topics
            .iter()
            .map(|(topic, qos)| (*topic, SubscriptionOptions::new(*qos)))
            .collect();
        self.subscribe_with_options(&subscriptions, &SubscribeProperties::default())
    }

    /// Subscribe to topics with full MQTT 5.0 subscription options.
    pub fn subscribe_with_options(
        &self,
        subscriptions: &[(&str, SubscriptionOptions)],
        properties: &SubscribeProperties,
    ) -> Result<u16> {
        self.shared
            .with_connection(|c| c.subscribe(subscriptions, properties))
    }

    pub fn unsubscribe(&self, topics: &[&str]) -> Result<u16> {
        self.shared.with_connection(|c| c.unsubscribe(topics))
    }

    pub fn send_auth(&self, auth: Auth) -> Result<()> {
        self.shared.with_connection(|c| c.send_auth(auth))
    }

    /// Send DISCONNECT immediately and close the connection.
    pub fn disconnect(&self, args: DisconnectArgs) -> Result<()> {
        self.shared.with_connection(|c| c.disconnect(args))
    }

    /// Run one tick. Only valid in sync mode.
    pub fn tick(&self) -> Result<()> {
        self.tick_at(Instant::now())
    }

    /// Run one tick as if the current time were `now`.
    pub fn tick_at(&self, now: Instant) -> Result<()> {
        if self.mode == TickMode::Async {
            return Err(ClientError::InvalidState(
                "ticks are driven by the background thread".into(),
            ));
        }
        let mut connection = self.shared.connection.lock();
        connection.tick_at(now);
        self.shared.forward_events(&mut connection);
        Ok(())
    }

    /// Event receiver. Events are delivered in the order they happened.
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn try_next_event(&self) -> Option<Event> {
        self.events.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn next_event_timeout(&self, timeout: Duration) -> Option<Event> {
        self.events.recv_timeout(timeout).ok()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.connection.lock().state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Unacknowledged outbound QoS 1/2 messages.
    pub fn in_flight(&self) -> usize {
        self.shared.connection.lock().session().len()
    }

    /// Stop the tick thread, drop all queued work and close the transport.
    ///
    /// A final [`Event::Disconnect`] is emitted if a connection was open.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("tick thread panicked");
            }
        }
        self.shared.with_connection(Connection::shutdown);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tick_loop(shared: &Shared, interval: Duration) {
    let mut connection = shared.connection.lock();
    while !shared.stop.load(Ordering::Acquire) {
        connection.tick_at(Instant::now());
        shared.forward_events(&mut connection);
        shared.wake.wait_for(&mut connection, interval);
    }
}
