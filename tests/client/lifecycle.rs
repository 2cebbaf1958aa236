//! Destroy semantics.

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use switchboard::transport::{InMemoryBroker, Transport};
use switchboard::{ClientError, Event, HandlerError, Request, ServiceInfo};

use crate::support::{connected_client, wait_until, FakeRegistrar};

// ============================================================================
// Test 1: destroy fails every outstanding request
// ============================================================================

#[test]
fn destroy_fails_pending_requests() {
    let broker = InMemoryBroker::new();
    let (client, _) = connected_client(&broker, "doomed");
    let client = Arc::new(client);
    let (tx, rx) = mpsc::channel();

    client
        .send_request_async(Request::new("/void/a"), move |outcome| {
            tx.send(outcome).unwrap();
        })
        .unwrap();
    let blocked = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.send_request_sync(Request::new("/void/b"), None))
    };
    assert!(wait_until(Duration::from_secs(2), || client.pending_requests() == 2));

    client.destroy();

    assert!(matches!(blocked.join().unwrap(), Err(ClientError::ClientDestroyed)));
    assert!(matches!(
        rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        Err(ClientError::ClientDestroyed)
    ));
    assert_eq!(client.pending_requests(), 0);
}

// ============================================================================
// Test 2: everything after destroy fails with ClientDestroyed
// ============================================================================

#[test]
fn operations_after_destroy_fail() {
    let broker = InMemoryBroker::new();
    let (client, transport) = connected_client(&broker, "gone");
    client.destroy();
    client.destroy();

    assert!(!transport.is_connected());
    assert!(!client.is_connected());
    assert!(matches!(client.send_event(Event::new("/a")), Err(ClientError::ClientDestroyed)));
    assert!(matches!(client.unsubscribe("/a"), Err(ClientError::ClientDestroyed)));
    assert!(matches!(
        client.send_request_async(Request::new("/a"), |_| {}),
        Err(ClientError::ClientDestroyed)
    ));
    assert!(matches!(
        client.register_service_async(ServiceInfo::new("late")),
        Err(ClientError::ClientDestroyed)
    ));
}

// ============================================================================
// Test 3: dropping the client unregisters its services
// ============================================================================

#[test]
fn drop_unregisters_services() {
    let broker = InMemoryBroker::new();
    let registrar = FakeRegistrar::accepting(&broker);
    let (client, _) = connected_client(&broker, "ephemeral");
    let info = ServiceInfo::new("tmp")
        .with_service_id("tmp-1")
        .add_topic("/svc/tmp", |_: &Request| -> Result<Vec<u8>, HandlerError> { Ok(Vec::new()) });
    client.register_service_sync(info, None).unwrap();
    let _ = registrar.next(Duration::from_secs(2)).unwrap();

    drop(client);

    let (topic, body) = registrar.next(Duration::from_secs(2)).unwrap();
    assert_eq!(topic, switchboard::service::UNREGISTER_TOPIC);
    assert_eq!(body["serviceId"], "tmp-1");
    assert_eq!(broker.connected_count(), 1);
}

// ============================================================================
// Test 4: destroy waits for in-flight callbacks within the grace period
// ============================================================================

#[test]
fn destroy_drains_in_flight_callbacks() {
    let broker = InMemoryBroker::new();
    let (client, _) = connected_client(&broker, "patient");
    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let started_tx = std::sync::Mutex::new(started_tx);
    let done_tx = std::sync::Mutex::new(done_tx);
    client
        .add_event_callback("/slow", move |_: &switchboard::Message| -> Result<(), HandlerError> {
            started_tx.lock().unwrap().send(()).unwrap();
            thread::sleep(Duration::from_millis(200));
            done_tx.lock().unwrap().send(()).unwrap();
            Ok(())
        })
        .unwrap();

    let (publisher, _) = connected_client(&broker, "nudger");
    publisher.send_event(Event::new("/slow")).unwrap();
    started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    client.destroy();

    assert!(done_rx.try_recv().is_ok());
}
