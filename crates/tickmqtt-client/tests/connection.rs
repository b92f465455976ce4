mod common;

use std::time::{Duration, Instant};

use common::{connack, drain_events, establish, stub, sync_client};
use tickmqtt_client::{
    BrokerAddress, Client, ClientError, Config, ConnAck, ConnectArgs, ConnectReasonCode,
    ConnectionState, Disconnect, DisconnectArgs, DisconnectReasonCode, ErrorCode, Event,
    MemorySessionStore, Packet, PropertyType, Publish, PublishOptions, QoS, TickMode,
};
use tickmqtt_core::{PubAckReasonCode, PubRelReasonCode, PublishAck, PublishRelease, SubAck,
    SubAckReasonCode, Utf8String};

fn incoming(topic: &str, qos: QoS, packet_id: Option<u16>) -> Packet {
    let mut publish = Publish::new(Utf8String::new(topic).unwrap(), qos, "payload");
    publish.packet_id = packet_id;
    Packet::Publish(publish)
}

#[test]
fn test_empty_host_is_rejected_before_transport() {
    let (client, broker) = sync_client();
    let err = client
        .connect(BrokerAddress::new("", 1883), ConnectArgs::new("c1"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingArgument);
    assert!(broker.connects().is_empty());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_connect_handshake() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    client
        .connect(
            BrokerAddress::new("broker.local", 1883),
            ConnectArgs::new("sensor-1").keep_alive(30),
        )
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert!(matches!(
        client.connect(BrokerAddress::new("broker.local", 1883), ConnectArgs::new("sensor-1")),
        Err(ClientError::AlreadyConnecting)
    ));

    client.tick_at(now).unwrap();
    match broker.received().as_slice() {
        [Packet::Connect(connect)] => {
            assert_eq!(connect.client_id.as_str(), "sensor-1");
            assert_eq!(connect.keep_alive, 30);
            assert!(connect.clean_start);
        }
        other => panic!("unexpected {:?}", other),
    }

    let mut ack = ConnAck::new(ConnectReasonCode::Success);
    ack.properties
        .try_add(PropertyType::SessionExpiryInterval, 1u32, true);
    broker.send(Packet::ConnAck(ack));
    client.tick_at(now).unwrap();

    match client.try_next_event() {
        Some(Event::Connect(details)) => {
            assert!(details.is_successful);
            assert!(!details.session_present);
            assert_eq!(details.address, BrokerAddress::new("broker.local", 1883));
            let ack = details.ack.unwrap();
            assert_eq!(
                ack.properties.get_u32(PropertyType::SessionExpiryInterval),
                Some(1)
            );
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(client.is_connected());
}

#[test]
fn test_connack_refusal_reports_failed_connect() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    client
        .connect(BrokerAddress::new("broker.local", 1883), ConnectArgs::new("c1"))
        .unwrap();
    client.tick_at(now).unwrap();
    broker.received();

    broker.send(Packet::ConnAck(ConnAck::new(ConnectReasonCode::NotAuthorized)));
    client.tick_at(now).unwrap();

    match client.try_next_event() {
        Some(Event::Connect(details)) => {
            assert!(!details.is_successful);
            assert_eq!(details.reason_code, Some(ConnectReasonCode::NotAuthorized));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_connect_timeout() {
    let (client, broker) = sync_client();
    broker.state.lock().auto_connect = false;
    client
        .connect(BrokerAddress::new("broker.local", 1883), ConnectArgs::new("c1"))
        .unwrap();
    let now = Instant::now();
    client.tick_at(now).unwrap();
    assert!(client.try_next_event().is_none());

    client.tick_at(now + Duration::from_secs(11)).unwrap();
    match client.try_next_event() {
        Some(Event::Connect(details)) => assert!(!details.is_successful),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_unstartable_addresses_fail_synchronously() {
    let (client, broker) = sync_client();
    broker.state.lock().refused_hosts = vec!["a.local".into(), "b.local".into()];

    let err = client
        .connect(
            BrokerAddress::new("a.local", 1883),
            ConnectArgs::new("c1").additional_address(BrokerAddress::new("b.local", 1883)),
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Transport);
    assert_eq!(broker.connects().len(), 2);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_additional_address_after_failed_attempt() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    client
        .connect(
            BrokerAddress::new("primary.local", 1883),
            ConnectArgs::new("c1").additional_address(BrokerAddress::new("backup.local", 1884)),
        )
        .unwrap();
    client.tick_at(now).unwrap();
    broker.received();

    broker.send(Packet::ConnAck(ConnAck::new(ConnectReasonCode::ServerUnavailable)));
    client.tick_at(now).unwrap();
    assert_eq!(client.state(), ConnectionState::Reconnecting);

    client.tick_at(now).unwrap();
    assert!(matches!(broker.received().as_slice(), [Packet::Connect(_)]));
    broker.send(connack(false));
    client.tick_at(now).unwrap();

    match client.try_next_event() {
        Some(Event::Reconnect(details)) => {
            assert!(details.is_successful);
            assert_eq!(details.address, BrokerAddress::new("backup.local", 1884));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        broker.connects(),
        vec![
            BrokerAddress::new("primary.local", 1883),
            BrokerAddress::new("backup.local", 1884)
        ]
    );
}

#[test]
fn test_connack_redirect() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    client
        .connect(BrokerAddress::new("old.local", 1883), ConnectArgs::new("c1"))
        .unwrap();
    client.tick_at(now).unwrap();
    broker.received();

    let mut ack = ConnAck::new(ConnectReasonCode::ServerMoved);
    ack.properties.try_add(
        PropertyType::ServerReference,
        Utf8String::new("new.local:8883").unwrap(),
        true,
    );
    broker.send(Packet::ConnAck(ack));
    client.tick_at(now).unwrap();
    client.tick_at(now).unwrap();
    assert!(matches!(broker.received().as_slice(), [Packet::Connect(_)]));

    broker.send(connack(false));
    client.tick_at(now).unwrap();
    match client.try_next_event() {
        Some(Event::Reconnect(details)) => {
            assert!(details.is_successful);
            assert_eq!(details.address, BrokerAddress::new("new.local", 8883));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_broker_disconnect_redirect_resends_session_in_order() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    let args = ConnectArgs::new("c1").clean_start(false);
    client
        .connect(BrokerAddress::new("a.local", 1883), args)
        .unwrap();
    client.tick_at(now).unwrap();
    broker.received();
    let mut ack = ConnAck::new(ConnectReasonCode::Success);
    ack.properties.try_add(PropertyType::ReceiveMaximum, 1u16, true);
    broker.send(Packet::ConnAck(ack));
    client.tick_at(now).unwrap();
    drain_events(&client);

    let opts = PublishOptions::new(QoS::AtLeastOnce);
    let first = client.publish("t", "a", &opts).unwrap().unwrap();
    let second = client.publish("t", "b", &opts).unwrap().unwrap();
    client.tick_at(now).unwrap();
    // The second publish is held by the broker's receive maximum
    let sent = broker.received();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].packet_id(), Some(first));

    let mut disconnect = Disconnect::new(DisconnectReasonCode::UseAnotherServer);
    disconnect.properties.try_add(
        PropertyType::ServerReference,
        Utf8String::new("b.local").unwrap(),
        true,
    );
    broker.send(Packet::Disconnect(disconnect));
    client.tick_at(now).unwrap();
    assert_eq!(client.state(), ConnectionState::Reconnecting);
    assert!(drain_events(&client).is_empty());

    client.tick_at(now).unwrap();
    match broker.received().as_slice() {
        [Packet::Connect(connect)] => assert!(!connect.clean_start),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        broker.connects(),
        vec![
            BrokerAddress::new("a.local", 1883),
            BrokerAddress::new("b.local", 1883)
        ]
    );

    broker.send(connack(true));
    client.tick_at(now).unwrap();
    match client.try_next_event() {
        Some(Event::Reconnect(details)) => {
            assert!(details.is_successful);
            assert!(details.session_present);
            assert_eq!(details.address, BrokerAddress::new("b.local", 1883));
        }
        other => panic!("unexpected {:?}", other),
    }

    client.tick_at(now).unwrap();
    let resent: Vec<(Option<u16>, bool)> = broker
        .received()
        .iter()
        .map(|p| match p {
            Packet::Publish(p) => (p.packet_id, p.dup),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(resent, vec![(Some(first), true), (Some(second), true)]);
    assert_eq!(client.in_flight(), 2);
}

#[test]
fn test_publish_requires_connection() {
    let (client, _broker) = sync_client();
    assert!(matches!(
        client.publish("t", "x", &PublishOptions::default()),
        Err(ClientError::NotConnected)
    ));
}

#[test]
fn test_qos1_retry_then_complete() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1"), now);

    let id = client
        .publish("sensors/1", "21.5", &PublishOptions::new(QoS::AtLeastOnce))
        .unwrap()
        .unwrap();
    client.tick_at(now).unwrap();
    match broker.received().as_slice() {
        [Packet::Publish(p)] => {
            assert_eq!(p.packet_id, Some(id));
            assert!(!p.dup);
        }
        other => panic!("unexpected {:?}", other),
    }

    let later = now + Duration::from_secs(6);
    client.tick_at(later).unwrap();
    client.tick_at(later).unwrap();
    match broker.received().as_slice() {
        [Packet::Publish(p)] => {
            assert_eq!(p.packet_id, Some(id));
            assert!(p.dup);
        }
        other => panic!("unexpected {:?}", other),
    }
    // Not due again yet
    client.tick_at(later + Duration::from_secs(1)).unwrap();
    assert!(broker.received().is_empty());

    broker.send(Packet::PubAck(PublishAck::new(id)));
    client.tick_at(later).unwrap();
    match client.try_next_event() {
        Some(Event::PublishCompleted(done)) => {
            assert_eq!(done.packet_id, id);
            assert_eq!(done.qos, QoS::AtLeastOnce);
            assert!(done.is_successful);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(client.in_flight(), 0);
}

#[test]
fn test_puback_error_completes_unsuccessfully() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1"), now);

    let id = client
        .publish("t", "x", &PublishOptions::new(QoS::AtLeastOnce))
        .unwrap()
        .unwrap();
    client.tick_at(now).unwrap();
    broker.send(Packet::PubAck(PublishAck::with_reason(
        id,
        PubAckReasonCode::NotAuthorized,
    )));
    client.tick_at(now).unwrap();

    match client.try_next_event() {
        Some(Event::PublishCompleted(done)) => assert!(!done.is_successful),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_qos2_outbound_flow() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1"), now);

    let id = client
        .publish("t", "x", &PublishOptions::new(QoS::ExactlyOnce))
        .unwrap()
        .unwrap();
    client.tick_at(now).unwrap();
    broker.received();

    broker.send(Packet::PubRec(PublishAck::new(id)));
    client.tick_at(now).unwrap();
    client.tick_at(now).unwrap();
    match broker.received().as_slice() {
        [Packet::PubRel(rel)] => {
            assert_eq!(rel.packet_id, id);
            assert_eq!(rel.reason_code, PubRelReasonCode::Success);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(client.try_next_event().is_none());

    broker.send(Packet::PubComp(PublishRelease::new(id)));
    client.tick_at(now).unwrap();
    match client.try_next_event() {
        Some(Event::PublishCompleted(done)) => {
            assert_eq!(done.qos, QoS::ExactlyOnce);
            assert!(done.is_successful);
            assert!(matches!(done.packet, Packet::PubComp(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_inbound_qos2_duplicate_delivered_once() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1"), now);

    broker.send(incoming("cmd/1", QoS::ExactlyOnce, Some(7)));
    broker.send(incoming("cmd/1", QoS::ExactlyOnce, Some(7)));
    client.tick_at(now).unwrap();
    let events = drain_events(&client);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Event::Publish(p) if p.topic.as_str() == "cmd/1"));

    client.tick_at(now).unwrap();
    let sent = broker.received();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .all(|p| matches!(p, Packet::PubRec(ack) if ack.packet_id == 7)));

    broker.send(Packet::PubRel(PublishRelease::new(7)));
    client.tick_at(now).unwrap();
    client.tick_at(now).unwrap();
    match broker.received().as_slice() {
        [Packet::PubComp(comp)] => {
            assert_eq!(comp.packet_id, 7);
            assert_eq!(comp.reason_code, PubRelReasonCode::Success);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_inbound_qos1_acknowledged() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1"), now);

    broker.send(incoming("a/b", QoS::AtLeastOnce, Some(3)));
    client.tick_at(now).unwrap();
    assert!(matches!(client.try_next_event(), Some(Event::Publish(_))));
    client.tick_at(now).unwrap();
    assert!(matches!(
        broker.received().as_slice(),
        [Packet::PubAck(ack)] if ack.packet_id == 3
    ));
}

#[test]
fn test_inbound_topic_alias() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(
        &client,
        &broker,
        ConnectArgs::new("c1").topic_alias_maximum(4),
        now,
    );

    let mut first = Publish::new(Utf8String::new("long/topic").unwrap(), QoS::AtMostOnce, "1");
    first.properties.try_add(PropertyType::TopicAlias, 2u16, true);
    let mut second = Publish::new(Utf8String::new("").unwrap(), QoS::AtMostOnce, "2");
    second.properties.try_add(PropertyType::TopicAlias, 2u16, true);
    broker.send(Packet::Publish(first));
    broker.send(Packet::Publish(second));
    client.tick_at(now).unwrap();

    let topics: Vec<String> = drain_events(&client)
        .into_iter()
        .filter_map(|e| match e {
            Event::Publish(p) => Some(p.topic.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(topics, vec!["long/topic", "long/topic"]);
}

#[test]
fn test_unknown_topic_alias_disconnects() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(
        &client,
        &broker,
        ConnectArgs::new("c1").topic_alias_maximum(4),
        now,
    );

    let mut publish = Publish::new(Utf8String::new("").unwrap(), QoS::AtMostOnce, "x");
    publish.properties.try_add(PropertyType::TopicAlias, 3u16, true);
    broker.send(Packet::Publish(publish));
    client.tick_at(now).unwrap();

    let events = drain_events(&client);
    assert!(matches!(
        events.as_slice(),
        [
            Event::Error { code: ErrorCode::Protocol, .. },
            Event::Disconnect { is_broker_induced: false, .. }
        ]
    ));
    assert!(matches!(
        broker.received().as_slice(),
        [Packet::Disconnect(d)] if d.reason_code == DisconnectReasonCode::TopicAliasInvalid
    ));
}

#[test]
fn test_receive_maximum_exceeded() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1").receive_maximum(2), now);

    for id in 1..=3 {
        broker.send(incoming("flood", QoS::AtLeastOnce, Some(id)));
    }
    client.tick_at(now).unwrap();

    let events = drain_events(&client);
    assert_eq!(events.len(), 4, "{:?}", events);
    assert!(matches!(events[0], Event::Publish(_)));
    assert!(matches!(events[1], Event::Publish(_)));
    assert!(matches!(events[2], Event::Error { code: ErrorCode::Protocol, .. }));
    assert!(matches!(
        events[3],
        Event::Disconnect {
            reason_code: Some(DisconnectReasonCode::ReceiveMaximumExceeded),
            ..
        }
    ));
    assert!(matches!(
        broker.received().as_slice(),
        [Packet::Disconnect(d)] if d.reason_code == DisconnectReasonCode::ReceiveMaximumExceeded
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_send_allowance_holds_publishes() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    client
        .connect(BrokerAddress::new("broker.local", 1883), ConnectArgs::new("c1"))
        .unwrap();
    client.tick_at(now).unwrap();
    broker.received();
    let mut ack = ConnAck::new(ConnectReasonCode::Success);
    ack.properties.try_add(PropertyType::ReceiveMaximum, 1u16, true);
    broker.send(Packet::ConnAck(ack));
    client.tick_at(now).unwrap();
    drain_events(&client);

    let opts = PublishOptions::new(QoS::AtLeastOnce);
    let first = client.publish("t", "1", &opts).unwrap().unwrap();
    let second = client.publish("t", "2", &opts).unwrap().unwrap();
    client.publish("t", "3", &PublishOptions::default()).unwrap();
    client.tick_at(now).unwrap();

    // The QoS 0 publish queued behind the held one still goes out
    let sent = broker.received();
    assert_eq!(sent.len(), 2, "{:?}", sent);
    assert_eq!(sent[0].packet_id(), Some(first));
    assert!(matches!(&sent[1], Packet::Publish(p) if p.qos == QoS::AtMostOnce));

    broker.send(Packet::PubAck(PublishAck::new(first)));
    client.tick_at(now).unwrap();
    client.tick_at(now).unwrap();
    let sent = broker.received();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].packet_id(), Some(second));
}

#[test]
fn test_subscribe_and_unsubscribe() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1"), now);

    let id = client
        .subscribe(&[("sensors/#", QoS::AtLeastOnce), ("cmd/+", QoS::AtMostOnce)])
        .unwrap();
    client.tick_at(now).unwrap();
    match broker.received().as_slice() {
        [Packet::Subscribe(sub)] => {
            assert_eq!(sub.packet_id, id);
            assert_eq!(sub.subscriptions.len(), 2);
        }
        other => panic!("unexpected {:?}", other),
    }

    broker.send(Packet::SubAck(SubAck {
        packet_id: id,
        properties: Default::default(),
        reason_codes: vec![SubAckReasonCode::GrantedQos1, SubAckReasonCode::GrantedQos0],
    }));
    client.tick_at(now).unwrap();
    assert!(matches!(client.try_next_event(), Some(Event::SubscribeAck(ack)) if ack.packet_id == id));

    let unsub = client.unsubscribe(&["sensors/#"]).unwrap();
    client.tick_at(now).unwrap();
    assert!(matches!(
        broker.received().as_slice(),
        [Packet::Unsubscribe(u)] if u.packet_id == unsub
    ));

    assert!(matches!(
        client.subscribe(&[]),
        Err(ClientError::MissingArgument(_))
    ));
}

#[test]
fn test_keep_alive_ping_and_timeout() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1").keep_alive(10), now);

    let ping_at = now + Duration::from_secs(10);
    client.tick_at(ping_at).unwrap();
    client.tick_at(ping_at).unwrap();
    assert_eq!(broker.received(), vec![Packet::PingReq]);

    broker.send(Packet::PingResp);
    client.tick_at(ping_at).unwrap();
    assert!(client.is_connected());

    let second_ping = ping_at + Duration::from_secs(10);
    client.tick_at(second_ping).unwrap();
    client.tick_at(second_ping).unwrap();
    assert_eq!(broker.received(), vec![Packet::PingReq]);

    client
        .tick_at(second_ping + Duration::from_secs(5))
        .unwrap();
    assert!(matches!(
        broker.received().as_slice(),
        [Packet::Disconnect(d)] if d.reason_code == DisconnectReasonCode::KeepAliveTimeout
    ));
    let events = drain_events(&client);
    assert!(matches!(
        events.last(),
        Some(Event::Disconnect {
            reason_code: Some(DisconnectReasonCode::KeepAliveTimeout),
            ..
        })
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_client_disconnect_sends_packet() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1"), now);

    client
        .disconnect(DisconnectArgs::default().will_publish(true))
        .unwrap();
    assert!(matches!(
        broker.received().as_slice(),
        [Packet::Disconnect(d)] if d.reason_code == DisconnectReasonCode::DisconnectWithWillMessage
    ));
    assert!(matches!(
        client.try_next_event(),
        Some(Event::Disconnect { is_broker_induced: false, .. })
    ));
    assert!(matches!(
        client.disconnect(DisconnectArgs::default()),
        Err(ClientError::NotConnected)
    ));
}

#[test]
fn test_broker_disconnect() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1"), now);

    broker.send(Packet::Disconnect(Disconnect::new(
        DisconnectReasonCode::ServerShuttingDown,
    )));
    client.tick_at(now).unwrap();
    match client.try_next_event() {
        Some(Event::Disconnect {
            is_broker_induced,
            reason_code,
            packet,
        }) => {
            assert!(is_broker_induced);
            assert_eq!(reason_code, Some(DisconnectReasonCode::ServerShuttingDown));
            assert!(packet.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_session_resumed_after_connection_loss() {
    let (client, broker) = sync_client();
    let store = MemorySessionStore::new();
    client.set_session_store(Box::new(store.clone()));
    let now = Instant::now();
    let args = ConnectArgs::new("durable").clean_start(false);
    establish(&client, &broker, args.clone(), now);

    let id = client
        .publish("t", "x", &PublishOptions::new(QoS::AtLeastOnce))
        .unwrap()
        .unwrap();
    client.tick_at(now).unwrap();
    broker.received();
    assert_eq!(store.len("durable"), 1);

    broker.hang_up();
    client.tick_at(now).unwrap();
    assert!(matches!(
        client.try_next_event(),
        Some(Event::Disconnect { is_broker_induced: true, .. })
    ));
    assert_eq!(client.in_flight(), 1);

    client
        .connect(BrokerAddress::new("broker.local", 1883), args)
        .unwrap();
    client.tick_at(now).unwrap();
    match broker.received().as_slice() {
        [Packet::Connect(connect)] => assert!(!connect.clean_start),
        other => panic!("unexpected {:?}", other),
    }
    broker.send(connack(true));
    client.tick_at(now).unwrap();
    assert!(matches!(
        client.try_next_event(),
        Some(Event::Connect(details)) if details.session_present
    ));

    client.tick_at(now).unwrap();
    match broker.received().as_slice() {
        [Packet::Publish(p)] => {
            assert_eq!(p.packet_id, Some(id));
            assert!(p.dup);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_session_discarded_without_session_present() {
    let (client, broker) = sync_client();
    let now = Instant::now();
    let args = ConnectArgs::new("c1").clean_start(false);
    establish(&client, &broker, args.clone(), now);
    client
        .publish("t", "x", &PublishOptions::new(QoS::AtLeastOnce))
        .unwrap();
    client.tick_at(now).unwrap();
    broker.hang_up();
    client.tick_at(now).unwrap();
    drain_events(&client);

    establish(&client, &broker, args, now);
    assert_eq!(client.in_flight(), 0);
}

#[test]
fn test_partial_writes_complete() {
    let (client, broker) = sync_client();
    broker.state.lock().write_limit = Some(3);
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1"), now);

    client
        .publish("chunked/topic", vec![0xAB; 100], &PublishOptions::default())
        .unwrap();
    client.tick_at(now).unwrap();
    match broker.received().as_slice() {
        [Packet::Publish(p)] => assert_eq!(p.payload.len(), 100),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_shutdown_emits_disconnect() {
    let (mut client, broker) = sync_client();
    let now = Instant::now();
    establish(&client, &broker, ConnectArgs::new("c1"), now);

    client.shutdown();
    assert!(broker.received().is_empty());
    assert!(matches!(
        client.try_next_event(),
        Some(Event::Disconnect { reason_code: None, .. })
    ));
    client.shutdown();
    assert!(client.try_next_event().is_none());
}

#[test]
fn test_async_mode_ticks_in_background() {
    let (transport, broker) = stub();
    let config = Config {
        tick_mode: TickMode::Async,
        async_tick_interval_ms: 5,
        ..Config::default()
    };
    let mut client = Client::new(config, transport).unwrap();
    assert!(matches!(client.tick(), Err(ClientError::InvalidState(_))));

    client
        .connect(BrokerAddress::new("broker.local", 1883), ConnectArgs::new("bg"))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen_connect = false;
    while !seen_connect && Instant::now() < deadline {
        seen_connect = broker
            .received()
            .iter()
            .any(|p| matches!(p, Packet::Connect(_)));
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(seen_connect);

    broker.send(connack(false));
    match client.next_event_timeout(Duration::from_secs(5)) {
        Some(Event::Connect(details)) => assert!(details.is_successful),
        other => panic!("unexpected {:?}", other),
    }

    client.shutdown();
    assert!(matches!(
        client.next_event_timeout(Duration::from_secs(1)),
        Some(Event::Disconnect { .. })
    ));
}
