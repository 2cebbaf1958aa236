//! Routes decoded inbound messages to registered callbacks.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use super::callback::{CallbackId, MessageCallback};
use super::pool::{panic_message, PoolStats, WorkerPool};
use crate::correlator::RequestCorrelator;
use crate::error::Result;
use crate::message::{codec, Message, MessageType};
use crate::subscription::SubscriptionRegistry;
use crate::sync::{read, write};
use crate::topic;

/// Statistics from the dispatcher.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages decoded and dispatched.
    pub dispatched: u64,
    /// Payloads dropped because they failed to decode.
    pub decode_failures: u64,
    /// Callback invocations that returned an error or panicked.
    pub handler_failures: u64,
    /// Worker pool counters.
    pub pool: PoolStats,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    decode_failures: AtomicU64,
    handler_failures: AtomicU64,
}

type Registered = (CallbackId, Arc<dyn MessageCallback>);

/// Callback registry keyed by (message type, topic).
///
/// The topic `""` receives every message of its type; a topic ending in `#`
/// receives every topic under that prefix.
pub struct CallbackDispatcher {
    callbacks: RwLock<HashMap<(MessageType, String), Vec<Registered>>>,
    next_id: AtomicU64,
    subscriptions: Arc<SubscriptionRegistry>,
    correlator: Arc<RequestCorrelator>,
    pool: Arc<WorkerPool>,
    counters: Arc<Counters>,
    closed: AtomicBool,
}

impl CallbackDispatcher {
    pub(crate) fn new(
        subscriptions: Arc<SubscriptionRegistry>,
        correlator: Arc<RequestCorrelator>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            subscriptions,
            correlator,
            pool,
            counters: Arc::new(Counters::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a callback for messages of `message_type` on `topic`.
    ///
    /// With `subscribe_to_topic`, the topic is also added to the client's
    /// subscriptions (skipped for the catch-all topic `""`). If that
    /// subscribe fails the registration is rolled back.
    pub fn register_callback<C>(
        &self,
        message_type: MessageType,
        topic: &str,
        callback: C,
        subscribe_to_topic: bool,
    ) -> Result<CallbackId>
    where
        C: MessageCallback + 'static,
    {
        self.register_shared(message_type, topic, Arc::new(callback), subscribe_to_topic)
    }

    pub(crate) fn register_shared(
        &self,
        message_type: MessageType,
        topic: &str,
        callback: Arc<dyn MessageCallback>,
        subscribe_to_topic: bool,
    ) -> Result<CallbackId> {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        write(&self.callbacks)
            .entry((message_type, topic.to_string()))
            .or_default()
            .push((id, callback));

        if subscribe_to_topic && !topic.is_empty() {
            if let Err(e) = self.subscriptions.subscribe(topic) {
                self.remove_callback(message_type, topic, id);
                return Err(e);
            }
        }

        debug!(%id, %message_type, topic, "callback registered");
        Ok(id)
    }

    /// Remove one registration. Topic interest is left unchanged.
    ///
    /// Returns `false` when no such registration exists.
    pub fn remove_callback(&self, message_type: MessageType, topic: &str, id: CallbackId) -> bool {
        let mut callbacks = write(&self.callbacks);
        let key = (message_type, topic.to_string());
        let Some(registered) = callbacks.get_mut(&key) else {
            return false;
        };

        let before = registered.len();
        registered.retain(|(existing, _)| *existing != id);
        let removed = registered.len() != before;
        if registered.is_empty() {
            callbacks.remove(&key);
        }
        if removed {
            debug!(%id, %message_type, topic, "callback removed");
        }
        removed
    }

    /// Number of callbacks registered for exactly this (type, topic).
    pub fn callback_count(&self, message_type: MessageType, topic: &str) -> usize {
        read(&self.callbacks)
            .get(&(message_type, topic.to_string()))
            .map_or(0, Vec::len)
    }

    /// Entry point for raw transport deliveries.
    ///
    /// Undecodable payloads are logged and dropped.
    pub fn handle_raw(&self, topic: &str, payload: &[u8]) {
        match codec::decode(payload) {
            Ok(message) => self.dispatch(message),
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(topic, error = %e, "dropping undecodable message");
            }
        }
    }

    /// Route a decoded message.
    ///
    /// Responses are offered to the correlator first; every message then
    /// fans out to the callbacks registered for its type and topic, which
    /// run on the worker pool in registration order.
    pub fn dispatch(&self, message: Message) {
        if self.closed.load(Ordering::SeqCst) {
            trace!(message_id = message.message_id(), "dispatcher closed, dropping message");
            return;
        }
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        if message.is_response() {
            self.correlator.resolve(&message);
        }

        let callbacks = self.callbacks_for(&message);
        if callbacks.is_empty() {
            trace!(
                message_id = message.message_id(),
                topic = message.destination_topic(),
                "no callbacks registered"
            );
            return;
        }

        let key = message.destination_topic().to_string();
        let counters = Arc::clone(&self.counters);
        let job = Box::new(move || {
            for callback in callbacks {
                invoke(callback.as_ref(), &message, &counters);
            }
        });

        if self.pool.submit(&key, job).is_err() {
            debug!(topic = %key, "dispatch pool closed, dropping message");
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
            pool: self.pool.stats(),
        }
    }

    /// Drop every registration and drain in-flight callbacks for up to `grace`.
    pub fn shutdown(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        write(&self.callbacks).clear();
        self.pool.shutdown(grace);
    }

    fn callbacks_for(&self, message: &Message) -> Vec<Arc<dyn MessageCallback>> {
        let message_type = message.message_type();
        let destination = message.destination_topic();

        let callbacks = read(&self.callbacks);
        let mut matched: Vec<&Registered> = callbacks
            .iter()
            .filter(|((ty, filter), _)| {
                ty.accepts(message_type)
                    && (filter.is_empty() || topic::matches(filter, destination))
            })
            .flat_map(|(_, registered)| registered.iter())
            .collect();
        matched.sort_by_key(|(id, _)| *id);
        matched.into_iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

fn invoke(callback: &dyn MessageCallback, message: &Message, counters: &Counters) {
    match catch_unwind(AssertUnwindSafe(|| callback.on_message(message))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            counters.handler_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                message_id = message.message_id(),
                topic = message.destination_topic(),
                error = %e,
                "callback failed"
            );
        }
        Err(panic) => {
            counters.handler_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                message_id = message.message_id(),
                topic = message.destination_topic(),
                panic = %panic_message(panic.as_ref()),
                "callback panicked"
            );
        }
    }
}
