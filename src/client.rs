//! The client facade.
//!
//! [`Client`] composes the codec, subscription registry, callback
//! dispatcher, request correlator and service registry over one
//! [`Transport`], and owns their lifecycle.
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use switchboard::message::{Message, Request, Response};
//! use switchboard::transport::InMemoryBroker;
//! use switchboard::{Client, ClientConfig, HandlerError};
//!
//! let broker = InMemoryBroker::new();
//!
//! // A client answering on /echo.
//! let server = Client::new(ClientConfig::new(), broker.transport()).unwrap();
//! let responder = server.responder();
//! server
//!     .add_request_callback("/echo", move |message: &Message| -> Result<(), HandlerError> {
//!         if let Message::Request(request) = message {
//!             let reply = Response::for_request(request).with_payload(request.payload().to_vec());
//!             responder.send_response(reply).ok();
//!         }
//!         Ok(())
//!     })
//!     .unwrap();
//! server.connect().unwrap();
//!
//! let client = Client::new(ClientConfig::new(), broker.transport()).unwrap();
//! client.connect().unwrap();
//!
//! let reply = client
//!     .send_request_sync(Request::new("/echo").with_string_payload("ping"), Some(Duration::from_secs(5)))
//!     .unwrap();
//! assert_eq!(reply.payload_str(), Some("ping"));
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::correlator::RequestCorrelator;
use crate::dispatch::pool::WorkerPool;
use crate::dispatch::{CallbackDispatcher, CallbackId, DispatchStats, MessageCallback};
use crate::error::{ClientError, Result};
use crate::message::{codec, Event, Message, MessageType, Request};
use crate::service::{ServiceInfo, ServiceRegistry};
use crate::subscription::SubscriptionRegistry;
use crate::topic::Topics;
use crate::transport::{PublishOptions, Transport, TransportError, TransportRef};

struct Inner {
    config: ClientConfig,
    transport: TransportRef,
    subscriptions: Arc<SubscriptionRegistry>,
    correlator: Arc<RequestCorrelator>,
    dispatcher: Arc<CallbackDispatcher>,
    services: ServiceRegistry,
    destroyed: AtomicBool,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ClientError::ClientDestroyed);
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.transport.is_connected() {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    fn publish(&self, message: Message, options: PublishOptions) -> Result<()> {
        self.ensure_connected()?;
        let topic = message.destination_topic().to_string();
        if topic.is_empty() {
            return Err(ClientError::invalid_argument(format!(
                "{} {} has no destination topic",
                message.message_type(),
                message.message_id()
            )));
        }
        self.transport.publish(&topic, codec::encode(&message), options)?;
        Ok(())
    }

    fn send_response(&self, message: Message) -> Result<()> {
        if !message.is_response() {
            return Err(ClientError::invalid_argument(format!(
                "send_response needs a response, got {}",
                message.message_type()
            )));
        }
        let message = self.stamp(message);
        self.publish(message, PublishOptions::default())
    }

    fn stamp(&self, mut message: Message) -> Message {
        if message.source_client_id().is_empty() {
            message
                .header_mut()
                .set_source_client_id(&self.config.client_id);
        }
        message
    }

    /// Runs on the transport after every (re)connect.
    fn on_connect(&self) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.subscriptions.on_reconnect() {
            warn!(error = %e, "failed to restore subscriptions after connect");
        }
        self.services.on_connect();
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(client_id = %self.config.client_id, "destroying client");

        self.services.shutdown();
        self.correlator.shutdown();
        self.dispatcher.shutdown(self.config.shutdown_grace_period());
        match self.transport.disconnect() {
            Ok(()) | Err(TransportError::NotConnected) => {}
            Err(e) => debug!(error = %e, "disconnect failed during destroy"),
        }
    }
}

/// A pub/sub client with request/response, callbacks and services.
///
/// Dropping the client destroys it. Share it between threads behind an
/// `Arc`.
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Build a client over `transport`. The client does not connect yet.
    pub fn new<T: Transport + 'static>(config: ClientConfig, transport: T) -> Result<Self> {
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build a client over a shared transport handle.
    pub fn with_transport(config: ClientConfig, transport: TransportRef) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(WorkerPool::spawn(
            config.dispatch_workers,
            config.inbound_queue_capacity,
        )?);
        let subscriptions = Arc::new(SubscriptionRegistry::new(Arc::clone(&transport)));
        let correlator = Arc::new(RequestCorrelator::new(
            Arc::clone(&transport),
            Arc::clone(&pool),
            &config.client_id,
            config.default_request_timeout(),
            config.timeout_sweep_interval(),
        )?);
        let dispatcher = Arc::new(CallbackDispatcher::new(
            Arc::clone(&subscriptions),
            Arc::clone(&correlator),
            pool,
        ));
        let services = ServiceRegistry::new(
            Arc::clone(&transport),
            Arc::clone(&subscriptions),
            Arc::clone(&dispatcher),
            Arc::clone(&correlator),
            &config.client_id,
            config.service_ttl_check_interval(),
        )?;

        let inner = Arc::new(Inner {
            config,
            transport: Arc::clone(&transport),
            subscriptions,
            correlator,
            dispatcher,
            services,
            destroyed: AtomicBool::new(false),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        transport.on_raw_message(Arc::new(move |topic: &str, payload: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatcher.handle_raw(topic, payload);
            }
        }));
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        transport.on_connect(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_connect();
            }
        }));

        inner
            .subscriptions
            .subscribe(inner.correlator.reply_to_topic())?;

        debug!(
            client_id = %inner.config.client_id,
            reply_to = inner.correlator.reply_to_topic(),
            "client created"
        );
        Ok(Self { inner })
    }

    pub fn connect(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.transport.connect()?;
        Ok(())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.transport.disconnect()?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        !self.is_destroyed() && self.inner.transport.is_connected()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The private topic responses to this client's requests arrive on.
    pub fn reply_to_topic(&self) -> &str {
        self.inner.correlator.reply_to_topic()
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Publish an event to its destination topic.
    pub fn send_event(&self, event: Event) -> Result<()> {
        self.send_event_with_options(event, PublishOptions::default())
    }

    /// Publish an event with explicit retain / QoS options.
    pub fn send_event_with_options(&self, event: Event, options: PublishOptions) -> Result<()> {
        let message = self.inner.stamp(event.into());
        self.inner.publish(message, options)
    }

    /// Publish a `Response` or `ErrorResponse` built by hand.
    pub fn send_response(&self, response: impl Into<Message>) -> Result<()> {
        self.inner.send_response(response.into())
    }

    /// A cheap handle that can send responses from inside callbacks.
    pub fn responder(&self) -> Responder {
        Responder {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Send a request and block until its response (`Response` or
    /// `ErrorResponse`) or `timeout`, which defaults to
    /// [`ClientConfig::default_request_timeout`].
    pub fn send_request_sync(&self, request: Request, timeout: Option<Duration>) -> Result<Message> {
        self.inner.ensure_connected()?;
        self.inner.correlator.send_sync(request, timeout)
    }

    /// Send a request and return its message id at once. `on_response`
    /// runs exactly once when `Ok` is returned.
    pub fn send_request_async<F>(&self, request: Request, on_response: F) -> Result<String>
    where
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        self.inner.ensure_connected()?;
        self.inner.correlator.send_async(request, on_response)
    }

    pub fn send_request_async_with_timeout<F>(
        &self,
        request: Request,
        timeout: Duration,
        on_response: F,
    ) -> Result<String>
    where
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        self.inner.ensure_connected()?;
        self.inner
            .correlator
            .send_async_with_timeout(request, timeout, on_response)
    }

    /// Requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    // ========================================================================
    // Subscriptions and callbacks
    // ========================================================================

    pub fn subscribe(&self, topics: impl Into<Topics>) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.subscriptions.subscribe(topics)
    }

    pub fn unsubscribe(&self, topics: impl Into<Topics>) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.subscriptions.unsubscribe(topics)
    }

    /// Snapshot of the subscribed topics, including the reply-to topic.
    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.inner.subscriptions.current_topics()
    }

    /// Register a callback for `message_type` on `topic`. `""` receives every
    /// message of that type; a topic ending in `#` receives its whole subtree.
    pub fn add_callback<C>(
        &self,
        message_type: MessageType,
        topic: &str,
        callback: C,
        subscribe_to_topic: bool,
    ) -> Result<CallbackId>
    where
        C: MessageCallback + 'static,
    {
        self.inner.ensure_open()?;
        self.inner
            .dispatcher
            .register_callback(message_type, topic, callback, subscribe_to_topic)
    }

    /// Register an event callback and subscribe to its topic.
    pub fn add_event_callback<C>(&self, topic: &str, callback: C) -> Result<CallbackId>
    where
        C: MessageCallback + 'static,
    {
        self.add_callback(MessageType::Event, topic, callback, true)
    }

    /// Register a request callback and subscribe to its topic.
    pub fn add_request_callback<C>(&self, topic: &str, callback: C) -> Result<CallbackId>
    where
        C: MessageCallback + 'static,
    {
        self.add_callback(MessageType::Request, topic, callback, true)
    }

    /// Register a response callback and subscribe to its topic.
    ///
    /// Responses to this client's own requests also reach callbacks on
    /// [`reply_to_topic`](Self::reply_to_topic), after the waiting request
    /// has been completed.
    pub fn add_response_callback<C>(&self, topic: &str, callback: C) -> Result<CallbackId>
    where
        C: MessageCallback + 'static,
    {
        self.add_callback(MessageType::Response, topic, callback, true)
    }

    /// Remove a registration. Subscriptions are left as they are.
    pub fn remove_callback(&self, message_type: MessageType, topic: &str, id: CallbackId) -> bool {
        self.inner.dispatcher.remove_callback(message_type, topic, id)
    }

    pub fn stats(&self) -> DispatchStats {
        self.inner.dispatcher.stats()
    }

    // ========================================================================
    // Services
    // ========================================================================

    pub fn register_service_sync(&self, info: ServiceInfo, timeout: Option<Duration>) -> Result<()> {
        self.inner.ensure_connected()?;
        self.inner.services.register_sync(info, timeout)
    }

    pub fn register_service_async(&self, info: ServiceInfo) -> Result<()> {
        self.inner.ensure_connected()?;
        self.inner.services.register_async(info)
    }

    pub fn unregister_service_sync(&self, service_id: &str, timeout: Option<Duration>) -> Result<()> {
        self.inner.ensure_connected()?;
        self.inner.services.unregister_sync(service_id, timeout)
    }

    pub fn unregister_service_async(&self, service_id: &str) -> Result<()> {
        self.inner.ensure_connected()?;
        self.inner.services.unregister_async(service_id)
    }

    /// Ids of the services this client currently offers.
    pub fn services(&self) -> Vec<String> {
        self.inner.services.service_ids()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Tear the client down. Idempotent and infallible.
    ///
    /// Unregisters services, fails pending requests with `ClientDestroyed`,
    /// drains in-flight callbacks for up to the configured grace period,
    /// then disconnects the transport.
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

/// Sends responses on behalf of a [`Client`] without keeping it alive.
///
/// Obtained from [`Client::responder`]; meant to be moved into callbacks.
#[derive(Clone)]
pub struct Responder {
    inner: Weak<Inner>,
}

impl Responder {
    /// Fails with `ClientDestroyed` once the client is gone.
    pub fn send_response(&self, response: impl Into<Message>) -> Result<()> {
        let inner = self.inner.upgrade().ok_or(ClientError::ClientDestroyed)?;
        inner.send_response(response.into())
    }
}
