//! Transport collaborator - the bare publish/subscribe connection.
//!
//! The client never talks to a broker directly. It drives a [`Transport`]
//! implementation and receives raw `(topic, payload)` pairs from it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Client (per process)                    │
//! │  - codec, correlation, dispatch, services                   │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Transport trait                        │
//! │  connect / disconnect / publish / subscribe / unsubscribe   │
//! │  on_raw_message(cb) / on_connect(cb)                        │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌─────────────────┐  ┌─────────────┐    ┌─────────────────────┐
//! │InMemoryTransport│  │    MQTT     │    │       NATS          │
//! │   (included)    │  │ (external)  │    │    (external)       │
//! └─────────────────┘  └─────────────┘    └─────────────────────┘
//! ```

mod in_memory;

use std::sync::Arc;

use thiserror::Error;

pub use in_memory::{InMemoryBroker, InMemoryTransport};

/// Delivery guarantee requested for a publish.
///
/// Passed through to the broker. [`InMemoryBroker`] ignores it: every live
/// matching subscriber receives each publish exactly once either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

/// Options for a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOptions {
    /// Ask the broker to keep the message for late subscribers.
    pub retain: bool,
    pub qos: QoS,
}

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No active connection to the broker.
    #[error("not connected")]
    NotConnected,
    /// The broker refused the operation.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Other error.
    #[error("transport failure: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Called with `(topic, payload)` for every inbound message.
pub type RawMessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Called after every successful (re)connect, before `connect` returns.
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// A publish/subscribe connection to the fabric.
///
/// Implementations own sockets, keep-alive and reconnection. They must
/// deliver inbound messages from a single logical thread, in arrival order,
/// and run every [`ConnectCallback`] after each (re)connect before
/// delivering anything received on the new session.
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<(), TransportError>;

    fn disconnect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Publish raw bytes to a topic.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError>;

    /// Subscribe to every topic in one broker call.
    fn subscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    /// Unsubscribe from every topic in one broker call.
    fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    /// Register the inbound delivery callback.
    fn on_raw_message(&self, callback: RawMessageCallback);

    /// Register a callback run after every successful (re)connect.
    fn on_connect(&self, callback: ConnectCallback);
}

/// Shared handle to a transport.
pub type TransportRef = Arc<dyn Transport>;
