//! Shared fixtures for client integration tests.

#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use switchboard::message::codec;
use switchboard::service::{REGISTER_TOPIC, UNREGISTER_TOPIC};
use switchboard::transport::{
    InMemoryBroker, InMemoryTransport, PublishOptions, Transport,
};
use switchboard::{
    Client, ClientConfig, ErrorResponse, HandlerError, Message, MessageCallback, Request, Response,
};

/// Config with short intervals so timeouts and refreshes show up quickly.
pub fn fast_config(client_id: &str) -> ClientConfig {
    ClientConfig::new()
        .with_client_id(client_id)
        .with_default_request_timeout(Duration::from_secs(5))
        .with_timeout_sweep_interval(Duration::from_millis(10))
        .with_shutdown_grace_period(Duration::from_secs(2))
        .with_service_ttl_check_interval(Duration::from_millis(50))
}

/// A connected client plus its transport handle for assertions.
pub fn connected_client(broker: &InMemoryBroker, client_id: &str) -> (Client, InMemoryTransport) {
    let transport = broker.transport();
    let client = Client::new(fast_config(client_id), transport.clone()).unwrap();
    client.connect().unwrap();
    (client, transport)
}

/// A callback that forwards every message it sees into a channel.
pub fn collector() -> (impl MessageCallback, Receiver<Message>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback = move |message: &Message| -> Result<(), HandlerError> {
        let _ = tx.lock().unwrap().send(message.clone());
        Ok(())
    };
    (callback, rx)
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Stand-in for the fabric's service registry: answers every request on
/// the registry topics, either accepting or refusing.
pub struct FakeRegistrar {
    transport: InMemoryTransport,
    requests: Receiver<Request>,
}

impl FakeRegistrar {
    pub fn accepting(broker: &InMemoryBroker) -> Self {
        Self::spawn(broker, None)
    }

    pub fn refusing(broker: &InMemoryBroker, code: i32, message: &str) -> Self {
        Self::spawn(broker, Some((code, message.to_string())))
    }

    fn spawn(broker: &InMemoryBroker, refusal: Option<(i32, String)>) -> Self {
        let transport = broker.transport();
        let publisher = transport.clone();
        let (tx, requests) = mpsc::channel();
        let tx = Mutex::new(tx);

        transport.on_raw_message(Arc::new(move |_topic: &str, payload: &[u8]| {
            let Ok(Message::Request(request)) = codec::decode(payload) else {
                return;
            };
            let reply: Message = match &refusal {
                Some((code, message)) => {
                    ErrorResponse::for_request(&request, *code, message.clone()).into()
                }
                None => Response::for_request(&request).into(),
            };
            publisher
                .publish(
                    request.reply_to_topic(),
                    codec::encode(&reply),
                    PublishOptions::default(),
                )
                .unwrap();
            let _ = tx.lock().unwrap().send(request);
        }));
        transport.connect().unwrap();
        transport
            .subscribe(&[REGISTER_TOPIC.to_string(), UNREGISTER_TOPIC.to_string()])
            .unwrap();

        Self {
            transport,
            requests,
        }
    }

    /// Next registry request received, decoded as JSON.
    pub fn next(&self, timeout: Duration) -> Option<(String, serde_json::Value)> {
        let request = self.requests.recv_timeout(timeout).ok()?;
        let body = serde_json::from_slice(request.payload()).ok()?;
        Some((request.destination_topic().to_string(), body))
    }

    pub fn transport(&self) -> &InMemoryTransport {
        &self.transport
    }
}
