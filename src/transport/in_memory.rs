//! In-memory broker and transport for testing and single-process scenarios.
//!
//! [`InMemoryBroker`] routes publishes to every attached transport whose
//! subscriptions match, and [`InMemoryTransport`] implements [`Transport`]
//! against it. Useful for:
//! - Unit and integration testing without an external broker
//! - Single-process applications wiring several clients together
//! - Simulating broker-side session loss and reconnects
//!
//! Delivery within the process cannot be lost, so [`PublishOptions::qos`]
//! has no effect here; `retain` is honored.

use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use tracing::{debug, trace};

use super::{ConnectCallback, PublishOptions, RawMessageCallback, Transport, TransportError};
use crate::sync::{lock, read, write};
use crate::topic;

type Delivery = (String, Vec<u8>);

/// A process-local publish/subscribe broker.
///
/// Cloning yields another handle to the same broker.
///
/// ## Example
///
/// ```
/// use switchboard::transport::{InMemoryBroker, PublishOptions, Transport};
///
/// let broker = InMemoryBroker::new();
/// let transport = broker.transport();
/// transport.connect().unwrap();
/// transport.subscribe(&["/news".to_string()]).unwrap();
///
/// broker.publish("/news", b"hello".to_vec());
/// assert_eq!(broker.published().len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    next_endpoint: u64,
    endpoints: HashMap<u64, Endpoint>,
    retained: HashMap<String, Vec<u8>>,
    published: Vec<Delivery>,
}

struct Endpoint {
    filters: BTreeSet<String>,
    inbox: Sender<Delivery>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new, disconnected transport attached to this broker.
    pub fn transport(&self) -> InMemoryTransport {
        InMemoryTransport::new(self.clone())
    }

    /// Publish from outside any transport (raw bytes are delivered as-is).
    pub fn publish(&self, topic: &str, payload: Vec<u8>) {
        self.route(topic, payload, false);
    }

    /// Every message routed through the broker, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        read(&self.state).published.clone()
    }

    /// Number of transports currently connected.
    pub fn connected_count(&self) -> usize {
        read(&self.state).endpoints.len()
    }

    fn attach(&self, inbox: Sender<Delivery>) -> u64 {
        let mut state = write(&self.state);
        state.next_endpoint += 1;
        let id = state.next_endpoint;
        state.endpoints.insert(
            id,
            Endpoint {
                filters: BTreeSet::new(),
                inbox,
            },
        );
        id
    }

    fn detach(&self, id: u64) {
        write(&self.state).endpoints.remove(&id);
    }

    fn add_filters(&self, id: u64, filters: &[String]) {
        let mut state = write(&self.state);
        let retained: Vec<Delivery> = state
            .retained
            .iter()
            .filter(|(topic, _)| filters.iter().any(|f| topic::matches(f, topic)))
            .map(|(topic, payload)| (topic.clone(), payload.clone()))
            .collect();

        if let Some(endpoint) = state.endpoints.get_mut(&id) {
            endpoint.filters.extend(filters.iter().cloned());
            for delivery in retained {
                let _ = endpoint.inbox.send(delivery);
            }
        }
    }

    fn remove_filters(&self, id: u64, filters: &[String]) {
        if let Some(endpoint) = write(&self.state).endpoints.get_mut(&id) {
            for filter in filters {
                endpoint.filters.remove(filter);
            }
        }
    }

    fn filters(&self, id: u64) -> BTreeSet<String> {
        read(&self.state)
            .endpoints
            .get(&id)
            .map(|e| e.filters.clone())
            .unwrap_or_default()
    }

    fn route(&self, topic: &str, payload: Vec<u8>, retain: bool) {
        let mut state = write(&self.state);
        state.published.push((topic.to_string(), payload.clone()));
        if retain {
            state.retained.insert(topic.to_string(), payload.clone());
        }

        for (id, endpoint) in &state.endpoints {
            if endpoint.filters.iter().any(|f| topic::matches(f, topic)) {
                trace!(endpoint = id, topic, "routing message");
                let _ = endpoint.inbox.send((topic.to_string(), payload.clone()));
            }
        }
    }
}

#[derive(Default)]
struct Callbacks {
    raw: Vec<RawMessageCallback>,
    connect: Vec<ConnectCallback>,
}

#[derive(Default)]
struct CallLog {
    connects: usize,
    subscribes: Vec<Vec<String>>,
    unsubscribes: Vec<Vec<String>>,
    published: Vec<Delivery>,
    reject_publish: bool,
}

/// A [`Transport`] backed by an [`InMemoryBroker`].
///
/// Features:
/// - Thread-safe (can be shared across threads via `Clone`)
/// - Inbound messages are delivered from one dedicated thread per session
/// - Records every subscribe/unsubscribe/publish call for assertions
/// - [`simulate_connection_loss`](Self::simulate_connection_loss) drops the
///   broker-side session, including its subscriptions
#[derive(Clone)]
pub struct InMemoryTransport {
    broker: InMemoryBroker,
    session: Arc<Mutex<Option<u64>>>,
    callbacks: Arc<RwLock<Callbacks>>,
    log: Arc<Mutex<CallLog>>,
}

impl InMemoryTransport {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            session: Arc::new(Mutex::new(None)),
            callbacks: Arc::new(RwLock::new(Callbacks::default())),
            log: Arc::new(Mutex::new(CallLog::default())),
        }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Drop the session as if the broker went away. Subscriptions are lost.
    pub fn simulate_connection_loss(&self) {
        if let Some(id) = lock(&self.session).take() {
            debug!(endpoint = id, "simulating connection loss");
            self.broker.detach(id);
        }
    }

    /// Make subsequent publishes fail with `Rejected`.
    pub fn set_reject_publish(&self, reject: bool) {
        lock(&self.log).reject_publish = reject;
    }

    /// Topic lists passed to each `subscribe` call, in order.
    pub fn subscribe_calls(&self) -> Vec<Vec<String>> {
        lock(&self.log).subscribes.clone()
    }

    /// Topic lists passed to each `unsubscribe` call, in order.
    pub fn unsubscribe_calls(&self) -> Vec<Vec<String>> {
        lock(&self.log).unsubscribes.clone()
    }

    /// Messages published through this transport, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.log).published.clone()
    }

    /// Number of successful connects (initial plus reconnects).
    pub fn connect_count(&self) -> usize {
        lock(&self.log).connects
    }

    /// Broker-side subscriptions of the current session.
    pub fn broker_subscriptions(&self) -> BTreeSet<String> {
        match *lock(&self.session) {
            Some(id) => self.broker.filters(id),
            None => BTreeSet::new(),
        }
    }

    /// Forget recorded calls (useful between test phases).
    pub fn clear_calls(&self) {
        let mut log = lock(&self.log);
        log.subscribes.clear();
        log.unsubscribes.clear();
        log.published.clear();
    }

    fn session_id(&self) -> Result<u64, TransportError> {
        (*lock(&self.session)).ok_or(TransportError::NotConnected)
    }
}

impl Transport for InMemoryTransport {
    fn connect(&self) -> Result<(), TransportError> {
        {
            let mut session = lock(&self.session);
            if session.is_some() {
                return Ok(());
            }

            let (inbox, deliveries) = channel::<Delivery>();
            let callbacks = Arc::clone(&self.callbacks);
            thread::Builder::new()
                .name("in-memory-delivery".to_string())
                .spawn(move || {
                    for (topic, payload) in deliveries {
                        let raw = read(&callbacks).raw.clone();
                        for callback in raw {
                            callback(&topic, &payload);
                        }
                    }
                })
                .map_err(|e| TransportError::Other(Box::new(e)))?;

            let id = self.broker.attach(inbox);
            debug!(endpoint = id, "in-memory transport connected");
            *session = Some(id);
        }

        lock(&self.log).connects += 1;

        let on_connect = read(&self.callbacks).connect.clone();
        for callback in on_connect {
            callback();
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let id = lock(&self.session)
            .take()
            .ok_or(TransportError::NotConnected)?;
        self.broker.detach(id);
        debug!(endpoint = id, "in-memory transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.session).is_some()
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        self.session_id()?;
        {
            let mut log = lock(&self.log);
            if log.reject_publish {
                return Err(TransportError::Rejected(format!("publish to {}", topic)));
            }
            log.published.push((topic.to_string(), payload.clone()));
        }
        self.broker.route(topic, payload, options.retain);
        Ok(())
    }

    fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        let id = self.session_id()?;
        lock(&self.log).subscribes.push(topics.to_vec());
        self.broker.add_filters(id, topics);
        Ok(())
    }

    fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        let id = self.session_id()?;
        lock(&self.log).unsubscribes.push(topics.to_vec());
        self.broker.remove_filters(id, topics);
        Ok(())
    }

    fn on_raw_message(&self, callback: RawMessageCallback) {
        write(&self.callbacks).raw.push(callback);
    }

    fn on_connect(&self, callback: ConnectCallback) {
        write(&self.callbacks).connect.push(callback);
    }
}
