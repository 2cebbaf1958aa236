//! Subscription and service replay after a lost session.

use std::time::Duration;

use switchboard::transport::InMemoryBroker;
use switchboard::{Event, HandlerError, Request, ServiceInfo};

use crate::support::{collector, connected_client, FakeRegistrar};

// ============================================================================
// Test 1: one subscribe call restores every topic
// ============================================================================

#[test]
fn reconnect_replays_all_topics_in_one_call() {
    let broker = InMemoryBroker::new();
    let (client, transport) = connected_client(&broker, "replayer");
    client.subscribe("a").unwrap();
    client.subscribe("b").unwrap();
    transport.clear_calls();

    transport.simulate_connection_loss();
    assert!(!client.is_connected());
    client.connect().unwrap();

    let calls = transport.subscribe_calls();
    assert_eq!(calls.len(), 1, "expected a single replay, got {:?}", calls);
    assert!(calls[0].contains(&"a".to_string()));
    assert!(calls[0].contains(&"b".to_string()));
    assert!(calls[0].contains(&client.reply_to_topic().to_string()));
}

// ============================================================================
// Test 2: nothing published right after reconnect is lost
// ============================================================================

#[test]
fn first_message_after_reconnect_arrives() {
    let broker = InMemoryBroker::new();
    let (client, transport) = connected_client(&broker, "listener");
    let (callback, received) = collector();
    client.add_event_callback("/ticks", callback).unwrap();

    transport.simulate_connection_loss();
    client.connect().unwrap();

    let (publisher, _) = connected_client(&broker, "ticker");
    publisher
        .send_event(Event::new("/ticks").with_string_payload("first"))
        .unwrap();

    let event = received.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(event.payload_str(), Some("first"));
}

// ============================================================================
// Test 3: topics subscribed while offline go out with the replay
// ============================================================================

#[test]
fn offline_subscriptions_are_sent_on_connect() {
    let broker = InMemoryBroker::new();
    let (client, transport) = connected_client(&broker, "offline");
    transport.simulate_connection_loss();
    transport.clear_calls();

    client.subscribe(["x", "y"]).unwrap();
    assert!(transport.subscribe_calls().is_empty());

    client.connect().unwrap();
    let calls = transport.subscribe_calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains(&"x".to_string()) && calls[0].contains(&"y".to_string()));
}

// ============================================================================
// Test 4: services are announced again after reconnect
// ============================================================================

#[test]
fn services_reregister_after_reconnect() {
    let broker = InMemoryBroker::new();
    let registrar = FakeRegistrar::accepting(&broker);
    let (client, transport) = connected_client(&broker, "provider");
    let info = ServiceInfo::new("clock")
        .with_service_id("clock-1")
        .add_topic("/svc/clock", |_: &Request| -> Result<Vec<u8>, HandlerError> { Ok(b"noon".to_vec()) });

    client.register_service_sync(info, None).unwrap();
    let (topic, _) = registrar.next(Duration::from_secs(2)).unwrap();
    assert_eq!(topic, switchboard::service::REGISTER_TOPIC);

    transport.simulate_connection_loss();
    client.connect().unwrap();

    let (topic, body) = registrar.next(Duration::from_secs(2)).unwrap();
    assert_eq!(topic, switchboard::service::REGISTER_TOPIC);
    assert_eq!(body["serviceId"], "clock-1");
}
