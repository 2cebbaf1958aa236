//! Request/response correlation over one-way publish.
//!
//! Every outgoing [`Request`] gets a pending entry keyed by its message id
//! before it is published. The dispatcher hands each inbound response to
//! [`RequestCorrelator::resolve`], which completes the entry whose id matches
//! the response's `request_message_id`.
//!
//! An entry leaves the table exactly once: on resolve, on timeout, or when
//! the correlator shuts down. Responses for ids no longer in the table
//! (duplicates, or answers to requests that already timed out) are dropped.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, sync_channel, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::dispatch::pool::{panic_message, PoolClosed, WorkerPool};
use crate::error::{ClientError, Result};
use crate::message::{codec, Message, Request};
use crate::sync::lock;
use crate::transport::{PublishOptions, TransportRef};

/// Prefix of every client's private reply-to topic.
pub const REPLY_TO_PREFIX: &str = "/switchboard/client/";

/// The reply-to topic for a client id.
pub fn reply_to_topic(client_id: &str) -> String {
    format!("{}{}", REPLY_TO_PREFIX, client_id)
}

/// Called once with the outcome of an asynchronous request.
pub type ResponseCallback = Box<dyn FnOnce(Result<Message>) + Send + 'static>;

enum Completion {
    /// A caller blocked in `send_sync`.
    Sync(SyncSender<Result<Message>>),
    /// A callback scheduled on the worker pool.
    Async(ResponseCallback),
}

struct PendingEntry {
    completion: Completion,
    created: Instant,
    timeout: Duration,
}

impl PendingEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created) >= self.timeout
    }
}

/// State shared with the timeout sweeper thread.
struct Shared {
    pending: Mutex<HashMap<String, PendingEntry>>,
    pool: Arc<WorkerPool>,
    reply_to_topic: String,
}

impl Shared {
    fn take(&self, message_id: &str) -> Option<PendingEntry> {
        lock(&self.pending).remove(message_id)
    }

    fn complete(&self, message_id: &str, entry: PendingEntry, outcome: Result<Message>) {
        match entry.completion {
            Completion::Sync(waiter) => {
                // Capacity 1 and a single send per entry: never full. A gone
                // waiter has already given up.
                let _ = waiter.try_send(outcome);
            }
            Completion::Async(callback) => {
                let message_id = message_id.to_string();
                let job = Box::new(move || {
                    trace!(%message_id, "running response callback");
                    callback(outcome);
                });
                if let Err(PoolClosed(job)) = self.pool.submit(&self.reply_to_topic, job) {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                        error!(panic = %panic_message(panic.as_ref()), "response callback panicked");
                    }
                }
            }
        }
    }

    /// Time out every asynchronous entry past its deadline.
    fn sweep(&self, now: Instant) {
        let expired: Vec<(String, PendingEntry)> = {
            let mut pending = lock(&self.pending);
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, e)| matches!(e.completion, Completion::Async(_)) && e.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|e| (id, e)))
                .collect()
        };

        for (message_id, entry) in expired {
            debug!(%message_id, timeout = ?entry.timeout, "asynchronous request timed out");
            let error = ClientError::RequestTimeout {
                message_id: message_id.clone(),
                timeout: entry.timeout,
            };
            self.complete(&message_id, entry, Err(error));
        }
    }
}

/// Handle to the background timeout sweeper. Drop or call `stop()` to shut down.
struct Sweeper {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    fn spawn(shared: Arc<Shared>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = channel();
        let handle = thread::Builder::new()
            .name("switchboard-timeouts".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => shared.sweep(Instant::now()),
                }
            })?;
        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Pending-request table with synchronous and asynchronous send.
pub struct RequestCorrelator {
    transport: TransportRef,
    shared: Arc<Shared>,
    client_id: String,
    default_timeout: Duration,
    closed: AtomicBool,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RequestCorrelator {
    pub(crate) fn new(
        transport: TransportRef,
        pool: Arc<WorkerPool>,
        client_id: &str,
        default_timeout: Duration,
        sweep_interval: Duration,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            pool,
            reply_to_topic: reply_to_topic(client_id),
        });
        let sweeper = Sweeper::spawn(Arc::clone(&shared), sweep_interval)?;

        Ok(Self {
            transport,
            shared,
            client_id: client_id.to_string(),
            default_timeout,
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// The private topic responses to this client's requests arrive on.
    pub fn reply_to_topic(&self) -> &str {
        &self.shared.reply_to_topic
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Send a request and block until its response or `timeout`
    /// (the default timeout when `None`).
    ///
    /// Returns the `Response` or `ErrorResponse` as a [`Message`]; an error
    /// response is a successful exchange, not an `Err`.
    pub fn send_sync(&self, request: Request, timeout: Option<Duration>) -> Result<Message> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let (waiter, outcome) = sync_channel(1);
        let message_id = self.register_and_publish(request, Completion::Sync(waiter), timeout)?;

        match outcome.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if self.shared.take(&message_id).is_some() {
                    debug!(%message_id, ?timeout, "request timed out");
                    return Err(ClientError::RequestTimeout { message_id, timeout });
                }
                // Resolved between the deadline and the removal.
                outcome
                    .try_recv()
                    .unwrap_or(Err(ClientError::RequestTimeout { message_id, timeout }))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::ClientDestroyed),
        }
    }

    /// Send a request and return immediately with its message id.
    ///
    /// When this returns `Ok`, `on_response` runs exactly once on the
    /// dispatch pool: with the response, or with `RequestTimeout` after the
    /// default timeout, or with `ClientDestroyed`. When it returns `Err`,
    /// `on_response` is never called.
    pub fn send_async<F>(&self, request: Request, on_response: F) -> Result<String>
    where
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        self.send_async_with_timeout(request, self.default_timeout, on_response)
    }

    /// [`send_async`](Self::send_async) with an explicit timeout.
    pub fn send_async_with_timeout<F>(
        &self,
        request: Request,
        timeout: Duration,
        on_response: F,
    ) -> Result<String>
    where
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        self.register_and_publish(request, Completion::Async(Box::new(on_response)), timeout)
    }

    /// Complete the pending entry a response answers.
    ///
    /// Returns `false` for messages that are not responses and for responses
    /// whose request is unknown, already answered or timed out.
    pub fn resolve(&self, response: &Message) -> bool {
        let Some(request_id) = response.request_message_id() else {
            return false;
        };

        match self.shared.take(request_id) {
            Some(entry) => {
                trace!(request_id, "response matched pending request");
                self.shared
                    .complete(request_id, entry, Ok(response.clone()));
                true
            }
            None => {
                trace!(request_id, "dropping response for unknown or expired request");
                false
            }
        }
    }

    /// Fail every pending request with `ClientDestroyed` and stop accepting new ones.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(sweeper) = lock(&self.sweeper).take() {
            sweeper.stop();
        }

        let drained: Vec<(String, PendingEntry)> = lock(&self.shared.pending).drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending requests on shutdown");
        }
        for (message_id, entry) in drained {
            self.shared
                .complete(&message_id, entry, Err(ClientError::ClientDestroyed));
        }
    }

    fn register_and_publish(
        &self,
        request: Request,
        completion: Completion,
        timeout: Duration,
    ) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ClientDestroyed);
        }

        let request = request
            .with_reply_to_topic(self.reply_to_topic())
            .with_source_client_id(&self.client_id);
        let message_id = request.message_id().to_string();
        if message_id.is_empty() {
            return Err(ClientError::invalid_argument("request has no message id"));
        }
        let topic = request.destination_topic().to_string();
        let bytes = codec::encode(&Message::Request(request));

        {
            let mut pending = lock(&self.shared.pending);
            // Shutdown sets `closed` before draining under this lock, so an
            // entry inserted here is either drained or never inserted.
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::ClientDestroyed);
            }
            if pending.contains_key(&message_id) {
                return Err(ClientError::invalid_argument(format!(
                    "request {} is already pending",
                    message_id
                )));
            }
            pending.insert(
                message_id.clone(),
                PendingEntry {
                    completion,
                    created: Instant::now(),
                    timeout,
                },
            );
        }

        if let Err(e) = self.transport.publish(&topic, bytes, PublishOptions::default()) {
            // Only report the failure if the entry was still ours to remove;
            // otherwise shutdown already completed it.
            if self.shared.take(&message_id).is_some() {
                warn!(%message_id, topic = %topic, error = %e, "failed to publish request");
                return Err(e.into());
            }
        }
        trace!(%message_id, topic = %topic, "request published");
        Ok(message_id)
    }
}

impl Drop for RequestCorrelator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
