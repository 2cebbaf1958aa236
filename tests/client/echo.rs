//! Echo round trips between two clients.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use switchboard::message::MessageType;
use switchboard::transport::InMemoryBroker;
use switchboard::{ErrorResponse, HandlerError, Message, Request, Response};

use crate::support::connected_client;

fn echo_server(broker: &InMemoryBroker) -> switchboard::Client {
    let (server, _) = connected_client(broker, "echo-server");
    let responder = server.responder();
    server
        .add_request_callback("/svc/echo", move |message: &Message| -> Result<(), HandlerError> {
            let Message::Request(request) = message else {
                return Ok(());
            };
            let reply = match request.payload_str() {
                Some("ping") => Message::from(Response::for_request(request).with_string_payload("pong")),
                _ => ErrorResponse::for_request(request, 400, "expected ping").into(),
            };
            responder.send_response(reply).unwrap();
            Ok(())
        })
        .unwrap();
    server
}

// ============================================================================
// Test 1: ping -> pong within five seconds
// ============================================================================

#[test]
fn ping_gets_pong() {
    let broker = InMemoryBroker::new();
    let _server = echo_server(&broker);
    let (client, _) = connected_client(&broker, "echo-client");

    let started = Instant::now();
    let reply = client
        .send_request_sync(
            Request::new("/svc/echo").with_string_payload("ping"),
            Some(Duration::from_secs(5)),
        )
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(reply.message_type(), MessageType::Response);
    assert_eq!(reply.payload_str(), Some("pong"));
    assert_eq!(reply.source_client_id(), "echo-server");
    assert_eq!(client.pending_requests(), 0);
}

// ============================================================================
// Test 2: async request completes on the callback
// ============================================================================

#[test]
fn async_ping_gets_pong() {
    let broker = InMemoryBroker::new();
    let _server = echo_server(&broker);
    let (client, _) = connected_client(&broker, "echo-client");
    let (tx, rx) = mpsc::channel();

    let message_id = client
        .send_request_async(Request::new("/svc/echo").with_string_payload("ping"), move |r| {
            tx.send(r).unwrap();
        })
        .unwrap();

    let reply = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(reply.request_message_id(), Some(message_id.as_str()));
    assert_eq!(reply.payload_str(), Some("pong"));
}

// ============================================================================
// Test 3: an error response is a completed exchange, not an Err
// ============================================================================

#[test]
fn error_response_is_returned_as_message() {
    let broker = InMemoryBroker::new();
    let _server = echo_server(&broker);
    let (client, _) = connected_client(&broker, "echo-client");

    let reply = client
        .send_request_sync(
            Request::new("/svc/echo").with_string_payload("hello"),
            Some(Duration::from_secs(5)),
        )
        .unwrap();

    match reply {
        Message::ErrorResponse(error) => {
            assert_eq!(error.error_code(), 400);
            assert_eq!(error.error_message(), "expected ping");
        }
        other => panic!("expected an error response, got {:?}", other),
    }
}

// ============================================================================
// Test 4: typed payloads survive the trip
// ============================================================================

#[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct Order {
    id: u32,
    items: Vec<String>,
}

#[test]
fn typed_payload_round_trip() {
    let broker = InMemoryBroker::new();
    let (server, _) = connected_client(&broker, "orders");
    let responder = server.responder();
    server
        .add_request_callback("/svc/orders", move |message: &Message| -> Result<(), HandlerError> {
            if let Message::Request(request) = message {
                let order: Order = request.decode_payload()?;
                let reply = Response::for_request(request)
                    .with_encoded_payload(&(order.items.len() as u32))?;
                responder.send_response(reply).unwrap();
            }
            Ok(())
        })
        .unwrap();
    let (client, _) = connected_client(&broker, "shop");

    let order = Order {
        id: 7,
        items: vec!["tea".into(), "scone".into()],
    };
    let reply = client
        .send_request_sync(
            Request::new("/svc/orders").with_encoded_payload(&order).unwrap(),
            Some(Duration::from_secs(5)),
        )
        .unwrap();

    let Message::Response(response) = reply else {
        panic!("expected a response");
    };
    assert_eq!(response.decode_payload::<u32>().unwrap(), 2);
}

// ============================================================================
// Test 5: response observers see failed replies too
// ============================================================================

#[test]
fn response_observer_sees_error_responses() {
    let broker = InMemoryBroker::new();
    let _server = echo_server(&broker);
    let (client, _) = connected_client(&broker, "echo-client");
    let (observer, observed) = crate::support::collector();
    client
        .add_response_callback(client.reply_to_topic(), observer)
        .unwrap();

    let reply = client
        .send_request_sync(
            Request::new("/svc/echo").with_string_payload("nope"),
            Some(Duration::from_secs(5)),
        )
        .unwrap();
    assert_eq!(reply.message_type(), MessageType::ErrorResponse);

    let seen = observed.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(seen.message_type(), MessageType::ErrorResponse);
    assert_eq!(seen.request_message_id(), reply.request_message_id());
}
