//! Connection state machine.
//!
//! Owns the transport, both queues, the flow-control trackers and the session
//! state. Nothing here blocks or spawns: every operation queues work and every
//! outcome is appended to the outbox, which the caller drains after each call.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tickmqtt_core::property::PropertyType;
use tickmqtt_core::{
    Auth, ConnAck, Disconnect, DisconnectReasonCode, Packet, ProtocolError, ProtocolVersion,
    PubRelReasonCode, Publish, PublishAck, PublishRelease, QoS, Subscribe, SubscriptionOptions,
    Unsubscribe, Utf8String,
};

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::events::{ConnectDetails, ConnectionState, Event, PublishCompleted};
use crate::options::{
    BrokerAddress, ConnectArgs, DisconnectArgs, PublishOptions, SubscribeProperties,
};
use crate::packet_id::PacketIdPool;
use crate::receive_maximum::ReceiveMaximumTracker;
use crate::receive_queue::ReceiveQueue;
use crate::send_queue::{self, SendContext, SendQueue};
use crate::session::{MessageStatus, SessionState};
use crate::store::SessionStore;
use crate::transport::{Transport, TransportEvent};

/// Redirections followed in a row before the attempt counts as failed.
const MAX_REDIRECTS: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingAck {
    Subscribe,
    Unsubscribe,
}

/// State of the current connection attempt or connection.
#[derive(Debug)]
struct ConnectionInfo {
    args: ConnectArgs,
    address: BrokerAddress,
    /// Additional addresses not tried yet.
    fallbacks: VecDeque<BrokerAddress>,
    /// Configured or broker-assigned identifier.
    client_id: String,
    /// Reached through a redirect or an additional address.
    is_reconnect: bool,
    redirects: u8,
    attempt_started: Instant,
    connack_received: bool,
    /// Zero disables keep-alive.
    keep_alive: Duration,
    maximum_packet_size: Option<u32>,
    topic_alias_maximum: u16,
    maximum_qos: QoS,
    retain_available: bool,
    inbound_aliases: HashMap<u16, Utf8String>,
    last_sent: Instant,
    ping_sent_at: Option<Instant>,
}

impl ConnectionInfo {
    fn new(args: ConnectArgs, address: BrokerAddress, now: Instant) -> Self {
        Self {
            fallbacks: args.additional_addresses.iter().cloned().collect(),
            client_id: args.client_id.clone(),
            keep_alive: Duration::from_secs(u64::from(args.keep_alive)),
            args,
            address,
            is_reconnect: false,
            redirects: 0,
            attempt_started: now,
            connack_received: false,
            maximum_packet_size: None,
            topic_alias_maximum: 0,
            maximum_qos: QoS::ExactlyOnce,
            retain_available: true,
            inbound_aliases: HashMap::new(),
            last_sent: now,
            ping_sent_at: None,
        }
    }

    /// Take the limits the broker returned, falling back to what was
    /// requested.
    fn negotiate(&mut self, ack: &ConnAck) {
        let props = &ack.properties;
        let keep_alive = props
            .get_u16(PropertyType::ServerKeepAlive)
            .unwrap_or(self.args.keep_alive);
        self.keep_alive = Duration::from_secs(u64::from(keep_alive));
        self.maximum_packet_size = props.get_u32(PropertyType::MaximumPacketSize);
        self.topic_alias_maximum = props
            .get_u16(PropertyType::TopicAliasMaximum)
            .unwrap_or(0);
        self.maximum_qos = match props.get_u8(PropertyType::MaximumQos) {
            Some(0) => QoS::AtMostOnce,
            Some(1) => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        };
        self.retain_available = props.get_u8(PropertyType::RetainAvailable) != Some(0);
        if let Some(assigned) = props.get_str(PropertyType::AssignedClientIdentifier) {
            self.client_id = assigned.to_string();
            self.args.client_id = assigned.to_string();
        }
    }

    fn details(&self, ack: Option<ConnAck>) -> ConnectDetails {
        ConnectDetails {
            is_successful: ack.as_ref().is_some_and(|a| !a.reason_code.is_error()),
            reason_code: ack.as_ref().map(|a| a.reason_code),
            session_present: ack.as_ref().is_some_and(|a| a.session_present),
            address: self.address.clone(),
            ack,
        }
    }
}

pub(crate) struct Connection {
    client_id: String,
    tag: String,
    config: Config,
    state: ConnectionState,
    transport: Box<dyn Transport>,
    send_queue: SendQueue,
    receive_queue: ReceiveQueue,
    tracker: ReceiveMaximumTracker,
    packet_ids: PacketIdPool,
    pending_acks: HashMap<u16, PendingAck>,
    session: SessionState,
    info: Option<ConnectionInfo>,
    transport_events: Vec<TransportEvent>,
    outbox: Vec<Event>,
}

impl Connection {
    pub(crate) fn new(config: Config, transport: Box<dyn Transport>) -> Self {
        let session = SessionState::new("-", config.retry_interval());
        Self {
            client_id: String::new(),
            tag: "-".to_string(),
            config,
            state: ConnectionState::Disconnected,
            transport,
            send_queue: SendQueue::new("-"),
            receive_queue: ReceiveQueue::new(),
            tracker: ReceiveMaximumTracker::default(),
            packet_ids: PacketIdPool::new(),
            pending_acks: HashMap::new(),
            session,
            info: None,
            transport_events: Vec::new(),
            outbox: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn set_session_store(&mut self, store: Box<dyn SessionStore>) {
        self.session.set_store(store);
    }

    pub(crate) fn session(&self) -> &SessionState {
        &self.session
    }

    pub(crate) fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outbox)
    }

    fn version(&self) -> ProtocolVersion {
        self.info
            .as_ref()
            .map_or(ProtocolVersion::V5, |info| info.args.version)
    }

    fn set_tag(&mut self, client_id: &str) {
        self.client_id = client_id.to_string();
        self.tag = format!("client {:?}", client_id);
        self.send_queue.set_tag(self.tag.clone());
        self.session.set_tag(self.tag.clone());
    }

    fn emit(&mut self, event: Event) {
        self.outbox.push(event);
    }

    fn emit_error(&mut self, error: &ClientError) {
        self.emit(Event::Error {
            code: error.code(),
            message: error.to_string(),
        });
    }

    // === Operations ===

    pub(crate) fn connect(
        &mut self,
        address: BrokerAddress,
        args: ConnectArgs,
        now: Instant,
    ) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connected => return Err(ClientError::AlreadyConnected),
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                return Err(ClientError::AlreadyConnecting)
            }
        }
        if address.host.is_empty() {
            return Err(ClientError::missing("hostname"));
        }
        args.validate()?;

        self.set_tag(&args.client_id);
        if args.clean_start {
            self.session.initialize_store(&args.client_id);
            self.session.clear();
            self.packet_ids.clear();
            self.pending_acks.clear();
        } else if self.session.is_empty() {
            self.session.restore(&args.client_id, &self.packet_ids, now);
        }
        self.tracker.reset_receive(args.effective_receive_maximum());
        self.tracker.reset_send(u16::MAX);
        self.receive_queue.clear();
        self.transport
            .set_maximum_packet_size(args.maximum_packet_size);

        log::info!("{} connecting to {}", self.tag, address);
        self.info = Some(ConnectionInfo::new(args, address, now));
        self.state = ConnectionState::Connecting;

        if self.open_transport() {
            return Ok(());
        }
        let address = self
            .info
            .take()
            .map(|info| info.address.to_string())
            .unwrap_or_default();
        self.state = ConnectionState::Disconnected;
        Err(ClientError::Transport(format!(
            "could not start connection to {}",
            address
        )))
    }

    /// Start connecting to the current address, moving through the fallback
    /// addresses until the transport accepts one.
    fn open_transport(&mut self) -> bool {
        let Some(info) = self.info.as_mut() else {
            return false;
        };
        loop {
            if self.transport.connect(&info.address) {
                return true;
            }
            log::warn!("{} could not start connection to {}", self.tag, info.address);
            match info.fallbacks.pop_front() {
                Some(next) => {
                    info.address = next;
                    info.is_reconnect = true;
                }
                None => return false,
            }
        }
    }

    pub(crate) fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        options: &PublishOptions,
        now: Instant,
    ) -> Result<Option<u16>> {
        if self.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let version = self.version();
        let Some(info) = self.info.as_ref() else {
            return Err(ClientError::NotConnected);
        };

        let alias = if version.is_v5() {
            options.properties.get_u16(PropertyType::TopicAlias)
        } else {
            None
        };
        if topic.is_empty() && alias.is_none() {
            return Err(ClientError::missing("topic"));
        }
        if topic.contains(['+', '#']) {
            return Err(ClientError::invalid(format!(
                "topic contains wildcard: {}",
                topic
            )));
        }
        if options.qos > info.maximum_qos {
            return Err(ClientError::invalid(format!(
                "broker maximum QoS is {:?}",
                info.maximum_qos
            )));
        }
        if options.retain && !info.retain_available {
            return Err(ClientError::invalid("broker does not support retain"));
        }
        if let Some(alias) = alias {
            if alias == 0 || alias > info.topic_alias_maximum {
                return Err(ClientError::invalid(format!(
                    "topic alias {} outside 1..={}",
                    alias, info.topic_alias_maximum
                )));
            }
        }

        let topic = Utf8String::new(topic)
            .map_err(|_| ClientError::invalid("topic longer than 65535 bytes"))?;
        let mut publish = Publish::new(topic, options.qos, payload);
        publish.retain = options.retain;
        if version.is_v5() {
            publish.properties = options.properties.clone();
        }

        if let Some(max) = info.maximum_packet_size {
            let size = Packet::Publish(publish.clone()).encoding_size(version);
            if size > max as usize {
                return Err(ClientError::invalid(format!(
                    "publish of {} bytes exceeds broker maximum packet size {}",
                    size, max
                )));
            }
        }

        let packet_id = if options.qos != QoS::AtMostOnce {
            let id = self
                .packet_ids
                .get_id()
                .ok_or(ClientError::PacketIdsExhausted)?;
            publish.packet_id = Some(id);
            self.session.add_message(id, publish.clone(), now);
            Some(id)
        } else {
            None
        };

        log::debug!(
            "{} queued PUBLISH topic={} qos={:?} packet_id={:?}",
            self.tag,
            publish.topic,
            publish.qos,
            packet_id
        );
        self.send_queue.push(Packet::Publish(publish));
        Ok(packet_id)
    }

    pub(crate) fn subscribe(
        &mut self,
        subscriptions: &[(&str, SubscriptionOptions)],
        properties: &SubscribeProperties,
    ) -> Result<u16> {
        if self.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        if subscriptions.is_empty() {
            return Err(ClientError::missing("topic filters"));
        }
        let mut entries = Vec::with_capacity(subscriptions.len());
        for (filter, options) in subscriptions {
            entries.push((checked_filter(filter)?, *options));
        }
        let properties = if self.version().is_v5() {
            properties.to_properties()?
        } else {
            Default::default()
        };

        let packet_id = self
            .packet_ids
            .get_id()
            .ok_or(ClientError::PacketIdsExhausted)?;
        self.pending_acks.insert(packet_id, PendingAck::Subscribe);
        self.send_queue.push(Packet::Subscribe(Subscribe {
            packet_id,
            properties,
            subscriptions: entries,
        }));
        Ok(packet_id)
    }

    pub(crate) fn unsubscribe(&mut self, filters: &[&str]) -> Result<u16> {
        if self.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        if filters.is_empty() {
            return Err(ClientError::missing("topic filters"));
        }
        let topic_filters = filters
            .iter()
            .map(|f| checked_filter(f))
            .collect::<Result<Vec<_>>>()?;

        let packet_id = self
            .packet_ids
            .get_id()
            .ok_or(ClientError::PacketIdsExhausted)?;
        self.pending_acks.insert(packet_id, PendingAck::Unsubscribe);
        self.send_queue.push(Packet::Unsubscribe(Unsubscribe {
            packet_id,
            properties: Default::default(),
            topic_filters,
        }));
        Ok(packet_id)
    }

    /// Queue an AUTH packet (enhanced authentication, MQTT 5 only).
    pub(crate) fn send_auth(&mut self, auth: Auth) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Err(ClientError::NotConnected);
        }
        if !self.version().is_v5() {
            return Err(ClientError::invalid("AUTH requires MQTT 5"));
        }
        self.send_queue.push(Packet::Auth(auth));
        Ok(())
    }

    pub(crate) fn disconnect(&mut self, args: DisconnectArgs) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Err(ClientError::NotConnected);
        }
        let reason_code = if args.will_publish {
            DisconnectReasonCode::DisconnectWithWillMessage
        } else {
            DisconnectReasonCode::NormalDisconnection
        };
        let mut packet = Disconnect::new(reason_code);
        if let Some(expiry) = args.session_expiry_interval {
            packet
                .properties
                .try_add(PropertyType::SessionExpiryInterval, expiry, true);
        }
        if let Some(reason) = &args.reason_string {
            let reason = Utf8String::new(reason.as_str())?;
            packet
                .properties
                .try_add(PropertyType::ReasonString, reason, true);
        }

        log::info!("{} disconnecting: {:?}", self.tag, reason_code);
        self.send_immediately(Packet::Disconnect(packet.clone()));
        self.transport.close();
        self.finish_disconnected(
            args.clear_queue,
            false,
            Some(reason_code),
            Some(packet),
        );
        Ok(())
    }

    /// Tear everything down without sending DISCONNECT.
    pub(crate) fn shutdown(&mut self) {
        let was_active = self.state != ConnectionState::Disconnected;
        self.transport.close();
        for packet in self.send_queue.clear() {
            self.release_unsent(&packet);
        }
        self.receive_queue.clear();
        for (packet_id, _) in self.pending_acks.drain() {
            self.packet_ids.release_id(packet_id);
        }
        self.session.clear_queued();
        self.info = None;
        self.state = ConnectionState::Disconnected;
        if was_active {
            log::info!("{} shut down", self.tag);
            self.emit(Event::Disconnect {
                is_broker_induced: false,
                reason_code: None,
                packet: None,
            });
        }
    }

    // === Tick ===

    /// One pass of the engine: transport events, connect timeout, send,
    /// receive, keep-alive, retries.
    pub(crate) fn tick_at(&mut self, now: Instant) {
        let lost = self.poll_transport(now);
        self.check_connect_timeout(now);

        if self.is_active() && self.transport.is_connected() {
            self.flush_send_queue(now);
        }
        if self.is_active() {
            self.process_received(now);
        }
        if let Some(broker_induced) = lost {
            if self.is_active() {
                self.transport_lost(broker_induced, now);
            }
        }
        if self.state == ConnectionState::Connected {
            self.check_keep_alive(now);
        }
        if self.state == ConnectionState::Connected {
            for packet in self.session.due_retries(now) {
                self.send_queue.push(packet);
            }
        }
    }

    fn is_active(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    /// Returns `Some(broker_induced)` if the transport reported the
    /// connection gone. Handling is deferred until the data received before
    /// the loss has been processed.
    fn poll_transport(&mut self, now: Instant) -> Option<bool> {
        let mut events = std::mem::take(&mut self.transport_events);
        self.transport.poll_events(&mut events);

        let mut lost = None;
        for event in events.drain(..) {
            if !self.is_active() {
                break;
            }
            match event {
                TransportEvent::Connected(true) => self.on_transport_connected(now),
                TransportEvent::Connected(false) => {
                    log::warn!("{} transport connect failed", self.tag);
                    self.attempt_failed(None, now);
                }
                TransportEvent::Data(frame) => self.receive_queue.push(frame),
                TransportEvent::Disconnected => lost = Some(true),
                TransportEvent::Error(message) => {
                    log::warn!("{} transport error: {}", self.tag, message);
                    self.emit_error(&ClientError::Transport(message));
                    lost = Some(false);
                }
                TransportEvent::Malformed(e) => {
                    self.protocol_error(e);
                }
            }
        }
        self.transport_events = events;
        lost
    }

    fn on_transport_connected(&mut self, now: Instant) {
        let Some(info) = self.info.as_mut() else {
            return;
        };
        if info.connack_received {
            return;
        }
        match info.args.to_connect(&info.client_id) {
            Ok(connect) => {
                info.last_sent = now;
                log::debug!("{} transport connected to {}", self.tag, info.address);
                self.send_queue.push_front(Packet::Connect(Box::new(connect)));
            }
            Err(e) => {
                self.emit_error(&e);
                self.transport.close();
                self.attempt_failed(None, now);
            }
        }
    }

    fn check_connect_timeout(&mut self, now: Instant) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            return;
        }
        let Some(info) = self.info.as_ref() else {
            return;
        };
        if now.saturating_duration_since(info.attempt_started)
            >= self.config.connect_timeout_duration()
        {
            log::warn!(
                "{} no CONNACK from {} within {:?}",
                self.tag,
                info.address,
                self.config.connect_timeout_duration()
            );
            self.transport.close();
            self.attempt_failed(None, now);
        }
    }

    fn flush_send_queue(&mut self, now: Instant) {
        let version = self.version();
        let (max_packet_size, established) = match self.info.as_ref() {
            Some(info) => (
                info.maximum_packet_size,
                self.state == ConnectionState::Connected,
            ),
            None => return,
        };

        let outcome = self.send_queue.send_next_batch(SendContext {
            transport: self.transport.as_mut(),
            tracker: &mut self.tracker,
            version,
            max_packet_size,
            config: &self.config,
            session_established: established,
        });

        if outcome.bytes_sent > 0 {
            if let Some(info) = self.info.as_mut() {
                info.last_sent = now;
            }
        }
        for packet in &outcome.flushed {
            self.on_flushed(packet, now);
        }

        if let Some(error) = outcome.error {
            log::error!("{} send failed: {}", self.tag, error);
            self.emit_error(&error);
            let reason = match &error {
                ClientError::Encode(_) => {
                    self.send_immediately(Packet::Disconnect(Disconnect::new(
                        DisconnectReasonCode::ImplementationSpecificError,
                    )));
                    Some(DisconnectReasonCode::ImplementationSpecificError)
                }
                _ => None,
            };
            self.transport.close();
            self.finish_disconnected(false, false, reason, None);
        }
    }

    /// Bookkeeping once the last byte of `packet` reached the socket.
    fn on_flushed(&mut self, packet: &Packet, now: Instant) {
        match packet {
            Packet::Publish(p) => {
                if let Some(id) = p.packet_id {
                    self.session.mark_flushed(id, now);
                }
            }
            Packet::PubRel(rel) => self.session.mark_flushed(rel.packet_id, now),
            Packet::PubAck(ack) => {
                self.tracker.increment_receive_allowance(ack.packet_id);
            }
            Packet::PubComp(comp) => {
                self.tracker.increment_receive_allowance(comp.packet_id);
            }
            Packet::PingReq => {
                if let Some(info) = self.info.as_mut() {
                    info.ping_sent_at = Some(now);
                }
            }
            _ => {}
        }
    }

    fn process_received(&mut self, now: Instant) {
        let version = self.version();
        let batch = self
            .receive_queue
            .receive_next_batch(version, &mut self.tracker);

        for packet in batch.packets {
            self.handle_packet(packet, now);
            if !self.is_active() {
                return;
            }
        }
        if let Some(error) = batch.error {
            self.protocol_error(error);
        }
    }

    fn check_keep_alive(&mut self, now: Instant) {
        let ping_timeout = self.config.ping_timeout_duration();
        let Some(info) = self.info.as_mut() else {
            return;
        };
        if info.keep_alive.is_zero() {
            return;
        }

        match info.ping_sent_at {
            Some(sent) if now.saturating_duration_since(sent) >= ping_timeout => {
                log::warn!("{} no PINGRESP within {:?}", self.tag, ping_timeout);
                let reason = DisconnectReasonCode::KeepAliveTimeout;
                self.emit_error(&ClientError::Transport("keep alive timeout".into()));
                self.send_immediately(Packet::Disconnect(Disconnect::new(reason)));
                self.transport.close();
                self.finish_disconnected(false, false, Some(reason), None);
            }
            Some(_) => {}
            None => {
                if now.saturating_duration_since(info.last_sent) >= info.keep_alive {
                    info.ping_sent_at = Some(now);
                    self.send_queue.push(Packet::PingReq);
                }
            }
        }
    }

    // === Incoming packets ===

    fn handle_packet(&mut self, packet: Packet, now: Instant) {
        let established = self.state == ConnectionState::Connected;
        if !established
            && !matches!(
                packet,
                Packet::ConnAck(_) | Packet::Auth(_) | Packet::Disconnect(_)
            )
        {
            self.protocol_error(ProtocolError::Violation(format!(
                "{:?} received before CONNACK",
                packet.packet_type()
            )));
            return;
        }

        match packet {
            Packet::ConnAck(ack) => self.handle_connack(ack, now),
            Packet::Publish(publish) => self.handle_publish(publish),
            Packet::PubAck(ack) => {
                let success = !ack.reason_code.is_error();
                self.complete_outbound(ack.packet_id, success, Packet::PubAck(ack));
            }
            Packet::PubRec(ack) => self.handle_pubrec(ack, now),
            Packet::PubRel(rel) => {
                let reason = if self.session.release_inbound(rel.packet_id) {
                    PubRelReasonCode::Success
                } else {
                    log::debug!(
                        "{} PUBREL for unknown packet_id={}",
                        self.tag,
                        rel.packet_id
                    );
                    PubRelReasonCode::PacketIdentifierNotFound
                };
                self.send_queue.push(Packet::PubComp(PublishRelease::with_reason(
                    rel.packet_id,
                    reason,
                )));
            }
            Packet::PubComp(comp) => {
                let success = !comp.reason_code.is_error();
                self.complete_outbound(comp.packet_id, success, Packet::PubComp(comp));
            }
            Packet::SubAck(ack) => {
                self.settle_pending_ack(ack.packet_id, PendingAck::Subscribe);
                self.emit(Event::SubscribeAck(ack));
            }
            Packet::UnsubAck(ack) => {
                self.settle_pending_ack(ack.packet_id, PendingAck::Unsubscribe);
                self.emit(Event::UnsubscribeAck(ack));
            }
            Packet::PingResp => {
                if let Some(info) = self.info.as_mut() {
                    info.ping_sent_at = None;
                }
            }
            Packet::Disconnect(disconnect) => self.handle_broker_disconnect(disconnect, now),
            Packet::Auth(auth) => {
                let expects_auth = self
                    .info
                    .as_ref()
                    .is_some_and(|info| info.args.authentication_method.is_some());
                if expects_auth {
                    self.emit(Event::Auth(auth));
                } else {
                    self.protocol_error(ProtocolError::Violation(
                        "AUTH without authentication method".into(),
                    ));
                }
            }
            other => self.protocol_error(ProtocolError::Violation(format!(
                "{:?} is never sent to a client",
                other.packet_type()
            ))),
        }
    }

    fn handle_connack(&mut self, ack: ConnAck, now: Instant) {
        if self.state == ConnectionState::Connected {
            self.protocol_error(ProtocolError::Violation("second CONNACK".into()));
            return;
        }
        let Some(info) = self.info.as_mut() else {
            return;
        };
        info.connack_received = true;

        if ack.reason_code.is_error() {
            log::warn!(
                "{} connection to {} refused: {:?}",
                self.tag,
                info.address,
                ack.reason_code
            );
            self.transport.close();
            let redirect = ack.reason_code.redirection().and_then(|_| {
                ack.properties
                    .get_str(PropertyType::ServerReference)
                    .and_then(|r| BrokerAddress::parse_reference(r, info.address.port))
            });
            match redirect {
                Some(address) => self.redirect(address, now),
                None => self.attempt_failed(Some(ack), now),
            }
            return;
        }

        info.negotiate(&ack);
        info.redirects = 0;
        info.inbound_aliases.clear();
        let client_id = info.client_id.clone();
        let is_reconnect = info.is_reconnect;
        let details = info.details(Some(ack.clone()));
        log::info!(
            "{} connected to {} (session_present={})",
            self.tag,
            details.address,
            ack.session_present
        );

        if client_id != self.client_id {
            self.set_tag(&client_id);
            self.session.initialize_store(&client_id);
        }
        self.state = ConnectionState::Connected;

        if ack.session_present {
            for packet in self.session.resend_all(now) {
                self.send_queue.push(packet);
            }
        } else {
            self.session.clear();
            self.packet_ids.clear();
            for (packet_id, _) in &self.pending_acks {
                self.packet_ids.reserve(*packet_id);
            }
        }

        if is_reconnect {
            self.emit(Event::Reconnect(details));
        } else {
            self.emit(Event::Connect(details));
        }
    }

    fn handle_publish(&mut self, mut publish: Publish) {
        if let Err(e) = self.resolve_topic_alias(&mut publish) {
            self.protocol_error(e);
            return;
        }

        match (publish.qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => self.emit(Event::Publish(publish)),
            (QoS::AtLeastOnce, Some(id)) => {
                self.send_queue.push(Packet::PubAck(PublishAck::new(id)));
                self.emit(Event::Publish(publish));
            }
            (QoS::ExactlyOnce, Some(id)) => {
                self.send_queue.push(Packet::PubRec(PublishAck::new(id)));
                if self.session.add_inbound(id) {
                    self.emit(Event::Publish(publish));
                } else {
                    log::debug!("{} duplicate QoS 2 PUBLISH packet_id={}", self.tag, id);
                }
            }
            (qos, None) => self.protocol_error(ProtocolError::Violation(format!(
                "{:?} PUBLISH without packet id",
                qos
            ))),
        }
    }

    fn resolve_topic_alias(
        &mut self,
        publish: &mut Publish,
    ) -> std::result::Result<(), ProtocolError> {
        let Some(info) = self.info.as_mut() else {
            return Ok(());
        };
        let Some(alias) = publish.properties.get_u16(PropertyType::TopicAlias) else {
            if publish.topic.is_empty() {
                return Err(ProtocolError::Violation("empty topic without alias".into()));
            }
            return Ok(());
        };
        if alias == 0 || alias > info.args.effective_topic_alias_maximum() {
            return Err(ProtocolError::TopicAliasInvalid(alias));
        }
        if publish.topic.is_empty() {
            match info.inbound_aliases.get(&alias) {
                Some(topic) => publish.topic = topic.clone(),
                None => return Err(ProtocolError::TopicAliasInvalid(alias)),
            }
        } else {
            info.inbound_aliases.insert(alias, publish.topic.clone());
        }
        Ok(())
    }

    fn handle_pubrec(&mut self, ack: PublishAck, now: Instant) {
        let packet_id = ack.packet_id;
        if ack.reason_code.is_error() {
            self.complete_outbound(packet_id, false, Packet::PubRec(ack));
            return;
        }
        let known = self
            .session
            .get(packet_id)
            .is_some_and(|e| e.publish.qos == QoS::ExactlyOnce);
        let reason = if known {
            self.session
                .update_message(packet_id, MessageStatus::WaitingForPubComp, now);
            PubRelReasonCode::Success
        } else {
            log::warn!("{} PUBREC for unknown packet_id={}", self.tag, packet_id);
            PubRelReasonCode::PacketIdentifierNotFound
        };
        self.send_queue
            .push(Packet::PubRel(PublishRelease::with_reason(packet_id, reason)));
    }

    /// Final acknowledgment of an outbound publish.
    fn complete_outbound(&mut self, packet_id: u16, is_successful: bool, packet: Packet) {
        let Some(entry) = self.session.remove_message(packet_id) else {
            log::warn!(
                "{} {:?} for unknown packet_id={}",
                self.tag,
                packet.packet_type(),
                packet_id
            );
            return;
        };
        self.packet_ids.release_id(packet_id);
        if !is_successful {
            log::warn!(
                "{} publish packet_id={} rejected by broker",
                self.tag,
                packet_id
            );
        }
        self.emit(Event::PublishCompleted(PublishCompleted {
            packet_id,
            qos: entry.publish.qos,
            is_successful,
            packet,
        }));
    }

    fn settle_pending_ack(&mut self, packet_id: u16, expected: PendingAck) {
        match self.pending_acks.remove(&packet_id) {
            Some(kind) if kind == expected => {}
            Some(kind) => log::warn!(
                "{} {:?} ack for packet_id={} that was a {:?}",
                self.tag,
                expected,
                packet_id,
                kind
            ),
            None => log::warn!(
                "{} {:?} ack for unknown packet_id={}",
                self.tag,
                expected,
                packet_id
            ),
        }
        // Released whether or not it matched
        self.packet_ids.release_id(packet_id);
    }

    fn handle_broker_disconnect(&mut self, disconnect: Disconnect, now: Instant) {
        let reason = disconnect.reason_code;
        log::info!("{} broker sent DISCONNECT: {:?}", self.tag, reason);
        self.transport.close();

        let port = self.info.as_ref().map_or(0, |info| info.address.port);
        let redirect = reason.redirection().and_then(|_| {
            disconnect
                .properties
                .get_str(PropertyType::ServerReference)
                .and_then(|r| BrokerAddress::parse_reference(r, port))
        });
        match redirect {
            Some(address) => self.redirect(address, now),
            None => self.finish_disconnected(false, true, Some(reason), Some(disconnect)),
        }
    }

    // === Failure paths ===

    fn protocol_error(&mut self, error: ProtocolError) {
        let reason = error.reason_code();
        log::error!("{} protocol error: {}", self.tag, error);
        self.send_immediately(Packet::Disconnect(Disconnect::new(reason)));
        self.transport.close();
        self.emit_error(&ClientError::Protocol(error));
        self.finish_disconnected(false, false, Some(reason), None);
    }

    fn transport_lost(&mut self, broker_induced: bool, now: Instant) {
        self.transport.close();
        let awaiting_connack = self
            .info
            .as_ref()
            .is_some_and(|info| !info.connack_received);
        if awaiting_connack {
            self.attempt_failed(None, now);
        } else {
            log::warn!("{} connection lost", self.tag);
            self.finish_disconnected(false, broker_induced, None, None);
        }
    }

    /// Follow a broker redirection.
    fn redirect(&mut self, address: BrokerAddress, now: Instant) {
        let Some(info) = self.info.as_mut() else {
            return;
        };
        if info.redirects >= MAX_REDIRECTS {
            log::warn!("{} too many redirections, giving up", self.tag);
            self.attempt_failed(None, now);
            return;
        }
        log::info!("{} redirected to {}", self.tag, address);
        info.redirects += 1;
        info.address = address;
        self.restart_attempt(now);
    }

    /// The current attempt failed: try the next additional address or give up.
    fn attempt_failed(&mut self, ack: Option<ConnAck>, now: Instant) {
        self.transport.close();
        let Some(info) = self.info.as_mut() else {
            return;
        };
        match info.fallbacks.pop_front() {
            Some(next) => {
                log::info!("{} trying additional address {}", self.tag, next);
                info.address = next;
                self.restart_attempt(now);
            }
            None => self.give_up(ack),
        }
    }

    fn restart_attempt(&mut self, now: Instant) {
        let Some(info) = self.info.as_mut() else {
            return;
        };
        info.is_reconnect = true;
        info.connack_received = false;
        info.attempt_started = now;
        info.ping_sent_at = None;
        info.inbound_aliases.clear();
        let receive_maximum = info.args.effective_receive_maximum();
        self.state = ConnectionState::Reconnecting;
        self.drop_connection_bound(false);
        self.tracker.reset_receive(receive_maximum);
        self.tracker.reset_send(u16::MAX);

        if !self.open_transport() {
            self.give_up(None);
        }
    }

    /// Report the failed attempt and return to Disconnected.
    fn give_up(&mut self, ack: Option<ConnAck>) {
        let Some(info) = self.info.as_ref() else {
            return;
        };
        let details = info.details(ack);
        let is_reconnect = info.is_reconnect;
        log::warn!("{} connection to {} failed", self.tag, details.address);
        self.teardown(false);
        self.emit(if is_reconnect {
            Event::Reconnect(details)
        } else {
            Event::Connect(details)
        });
    }

    fn finish_disconnected(
        &mut self,
        clear_queue: bool,
        is_broker_induced: bool,
        reason_code: Option<DisconnectReasonCode>,
        packet: Option<Disconnect>,
    ) {
        self.teardown(clear_queue);
        self.emit(Event::Disconnect {
            is_broker_induced,
            reason_code,
            packet,
        });
    }

    /// Leave the connection Disconnected. Queued QoS 0 publishes and pending
    /// subscriptions survive unless `clear_queue`.
    fn teardown(&mut self, clear_queue: bool) {
        self.drop_connection_bound(clear_queue);
        self.info = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Drop everything tied to the old network connection: acks, pings and
    /// queued QoS 1/2 copies (the session resends those), subscription acks
    /// that can no longer arrive, and undecoded input.
    fn drop_connection_bound(&mut self, clear_queue: bool) {
        let dropped = if clear_queue {
            self.send_queue.clear()
        } else {
            self.send_queue.take_where(|p| match p {
                Packet::Publish(p) => p.qos != QoS::AtMostOnce,
                Packet::Subscribe(_) | Packet::Unsubscribe(_) => false,
                _ => true,
            })
        };
        for packet in &dropped {
            self.release_unsent(packet);
        }

        let queued: HashSet<u16> = self
            .send_queue
            .iter()
            .filter_map(Packet::packet_id)
            .collect();
        let orphaned: Vec<u16> = self
            .pending_acks
            .keys()
            .copied()
            .filter(|id| !queued.contains(id))
            .collect();
        for packet_id in orphaned {
            self.pending_acks.remove(&packet_id);
            self.packet_ids.release_id(packet_id);
        }

        self.receive_queue.clear();
        self.session.clear_queued();
    }

    /// Release the packet ID of a packet dropped before it was sent. Session
    /// publishes keep theirs; the session still owns them.
    fn release_unsent(&mut self, packet: &Packet) {
        let packet_id = match packet {
            Packet::Subscribe(s) => s.packet_id,
            Packet::Unsubscribe(u) => u.packet_id,
            _ => return,
        };
        self.pending_acks.remove(&packet_id);
        self.packet_ids.release_id(packet_id);
    }

    /// Write `packet` straight to the socket, bypassing the queue.
    fn send_immediately(&mut self, packet: Packet) {
        if !self.transport.is_connected() {
            return;
        }
        let bytes = match packet.encode(self.version()) {
            Ok(buf) => buf,
            Err(e) => {
                log::error!("{} cannot encode {:?}: {}", self.tag, packet.packet_type(), e);
                return;
            }
        };
        let (_, error) = send_queue::send_all(
            self.transport.as_mut(),
            bytes.as_slice(),
            &self.config,
            &self.tag,
        );
        if let Some(e) = error {
            log::warn!("{} could not send {:?}: {}", self.tag, packet.packet_type(), e);
        }
    }
}

fn checked_filter(filter: &str) -> Result<Utf8String> {
    if filter.is_empty() {
        return Err(ClientError::invalid("empty topic filter"));
    }
    Utf8String::new(filter).map_err(|_| ClientError::invalid("topic filter longer than 65535 bytes"))
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("tag", &self.tag)
            .field("state", &self.state)
            .field("queued", &self.send_queue.len())
            .field("session", &self.session.len())
            .finish()
    }
}
