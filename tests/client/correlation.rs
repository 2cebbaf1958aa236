//! Correlation exactness, timeouts and late responses.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use switchboard::transport::InMemoryBroker;
use switchboard::{ClientError, HandlerError, Message, Request, Response};

use crate::support::{collector, connected_client, wait_until};

const CALLERS: usize = 32;

// ============================================================================
// Test 1: every caller gets the answer to its own request
// ============================================================================

#[test]
fn concurrent_requests_resolve_to_their_own_responses() {
    let broker = InMemoryBroker::new();
    let (server, _) = connected_client(&broker, "batcher");
    let responder = server.responder();
    let held: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));

    // Hold every request until all have arrived, then answer in reverse.
    let batch = Arc::clone(&held);
    server
        .add_request_callback("/svc/batch", move |message: &Message| -> Result<(), HandlerError> {
            let mut held = batch.lock().unwrap();
            held.push(message.clone());
            if held.len() == CALLERS {
                for message in held.drain(..).rev() {
                    if let Message::Request(request) = message {
                        let echo = request.payload().to_vec();
                        responder
                            .send_response(Response::for_request(&request).with_payload(echo))
                            .unwrap();
                    }
                }
            }
            Ok(())
        })
        .unwrap();

    let (client, _) = connected_client(&broker, "callers");
    let client = Arc::new(client);
    let callers: Vec<_> = (0..CALLERS)
        .map(|i| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                let body = format!("caller-{}", i);
                let reply = client
                    .send_request_sync(
                        Request::new("/svc/batch").with_string_payload(body.clone()),
                        Some(Duration::from_secs(10)),
                    )
                    .unwrap();
                (body, reply.payload_str().map(str::to_string))
            })
        })
        .collect();

    for caller in callers {
        let (sent, received) = caller.join().unwrap();
        assert_eq!(received.as_deref(), Some(sent.as_str()));
    }
    assert_eq!(client.pending_requests(), 0);
}

// ============================================================================
// Test 2: timeout lands within [T, T + epsilon] and a late answer is dropped
// ============================================================================

#[test]
fn timeout_then_late_response_is_dropped() {
    let broker = InMemoryBroker::new();
    let (server, _) = connected_client(&broker, "slowpoke");
    let held: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&held);
    server
        .add_request_callback("/svc/slow", move |message: &Message| -> Result<(), HandlerError> {
            sink.lock().unwrap().push(message.clone());
            Ok(())
        })
        .unwrap();

    let (client, _) = connected_client(&broker, "impatient");
    let (observer, observed) = collector();
    client
        .add_response_callback(client.reply_to_topic(), observer)
        .unwrap();

    let timeout = Duration::from_millis(200);
    let started = Instant::now();
    let err = client
        .send_request_sync(Request::new("/svc/slow"), Some(timeout))
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ClientError::RequestTimeout { .. }));
    assert!(elapsed >= timeout, "returned early after {:?}", elapsed);
    assert!(elapsed < timeout + Duration::from_secs(1), "took {:?}", elapsed);
    assert_eq!(client.pending_requests(), 0);

    // Answer late; the response reaches observers but completes nothing.
    assert!(wait_until(Duration::from_secs(2), || !held.lock().unwrap().is_empty()));
    let late = match held.lock().unwrap().pop() {
        Some(Message::Request(request)) => Response::for_request(&request),
        other => panic!("expected held request, got {:?}", other),
    };
    server.send_response(late).unwrap();

    assert!(observed.recv_timeout(Duration::from_secs(2)).is_ok());
    assert_eq!(client.pending_requests(), 0);
}

// ============================================================================
// Test 3: async timeout is delivered to the callback exactly once
// ============================================================================

#[test]
fn async_timeout_fires_once() {
    let broker = InMemoryBroker::new();
    let (client, _) = connected_client(&broker, "lonely");
    let (tx, rx) = std::sync::mpsc::channel();

    client
        .send_request_async_with_timeout(
            Request::new("/nobody/home"),
            Duration::from_millis(100),
            move |outcome| tx.send(outcome).unwrap(),
        )
        .unwrap();

    let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(outcome.unwrap_err().is_timeout());
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(client.pending_requests(), 0);
}
